use crate::cache::{CacheOutcome, ShaderCache};
use crate::config::Session;
use crate::fingerprint::fingerprint_dir;
use crate::process::Executor;
use crate::results::{self, SessionManifest, FRAME_COLUMNS};
use crate::types::{BenchmarkSuite, BuildConfiguration, Define, RunResult, SuiteOutcome};
use crate::variants::{self, Experiment};
use crate::{hw, output, runner, toolchain};

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub struct AppConfig {
    pub session: Session,
}

/* =========================
   Helpers
   ========================= */

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn defines_line(defines: &[Define]) -> String {
    if defines.is_empty() {
        return "(none)".to_string();
    }
    defines
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn require_shader_dir(session: &Session) -> Result<()> {
    if !session.shader_dir.is_dir() {
        bail!("Shader directory not found: {}", session.shader_dir.display());
    }
    Ok(())
}

fn shader_cache(session: &Session) -> ShaderCache<'_> {
    ShaderCache {
        dir: &session.shader_dir,
        state_file: &session.state_file,
        compiler: &session.compiler,
    }
}

/* =========================
   Shaders
   ========================= */

/// Standalone shader cache run. Compile failures make the command fail.
pub fn shaders(
    cfg: &AppConfig,
    exec: &dyn Executor,
    force: bool,
    defines: &[Define],
) -> Result<()> {
    let session = &cfg.session;
    require_shader_dir(session)?;

    output::status("Checking", session.shader_dir.display().to_string());
    match shader_cache(session).ensure_compiled(exec, force, defines)? {
        CacheOutcome::Unchanged(fp) => {
            output::status("Fresh", "No changes in shaders");
            output::step(format!("fingerprint {fp}"));
            Ok(())
        }
        CacheOutcome::Compiled {
            forced,
            report,
            fingerprint,
        } => {
            let why = if forced { "forced" } else { "sources changed" };
            output::status(
                "Compiled",
                format!("{} shader(s) ({})", report.compiled.len(), why),
            );
            output::step(format!("fingerprint {fingerprint}"));
            if report.is_clean() {
                return Ok(());
            }
            for f in &report.failed {
                output::fail("Failed", f.source.display().to_string());
                output::step(&f.reason);
            }
            output::warn("fix the sources or pass --force to retry");
            Err(anyhow!("{} shader(s) failed to compile", report.failed.len()))
        }
    }
}

pub fn fingerprint(dir: &Path, state_file: &str) -> Result<()> {
    let fp = fingerprint_dir(dir, state_file)
        .with_context(|| format!("fingerprint {}", dir.display()))?;
    println!("{fp}");
    Ok(())
}

/* =========================
   Experiments
   ========================= */

pub fn list_experiments(cfg: &AppConfig) -> Result<()> {
    let s = &cfg.session;
    println!("Experiments:");
    for name in variants::experiment_names(&s.custom_experiments) {
        let e = variants::generate(&name, &s.baseline, &s.custom_experiments)?;
        println!("  - {:<24} {:>2} suite(s)  {}", e.name, e.suites.len(), e.description);
    }
    Ok(())
}

fn select_suites(experiment: Experiment, only: &[String]) -> Result<Experiment> {
    if only.is_empty() {
        return Ok(experiment);
    }
    for name in only {
        if !experiment.suites.iter().any(|s| &s.name == name) {
            bail!("experiment '{}' has no suite '{}'", experiment.name, name);
        }
    }
    let suites = experiment
        .suites
        .into_iter()
        .filter(|s| only.contains(&s.name))
        .collect();
    Ok(Experiment { suites, ..experiment })
}

/// Defines whose value differs from `base`, including ones `base` lacks.
fn changed_defines(base: &BuildConfiguration, build: &BuildConfiguration) -> Vec<Define> {
    build
        .defines
        .iter()
        .filter(|d| base.get(&d.key) != Some(d.value.as_str()))
        .cloned()
        .collect()
}

/// Shows what `run` would do, touching nothing.
pub fn plan(cfg: &AppConfig, name: &str) -> Result<()> {
    let s = &cfg.session;
    let e = variants::generate(name, &s.baseline, &s.custom_experiments)?;

    println!("=== PLAN: {} ===", e.name);
    println!("{}", e.description);
    for (i, suite) in e.suites.iter().enumerate() {
        println!("\n[{}] {} - {}", i, suite.name, suite.description);
        println!("  build   : {} {}", suite.build.profile, suite.build.platform);
        println!("  defines : {}", defines_line(&suite.build.defines));
        let changes = changed_defines(&s.baseline.build, &suite.build);
        println!("  changes : {}", defines_line(&changes));
        println!("  shaders : {}", defines_line(&suite.shader_defines));
        println!("  scenario: {}", suite.scenario.to_args().join(" "));
    }
    Ok(())
}

/* =========================
   Orchestration
   ========================= */

/// Shaders, build, then run, for each suite in order.
///
/// Always returns one result per suite, in suite order. Shader files that fail
/// to compile are recorded on the result but do not stop the suite. A failed
/// build, or a shader directory that cannot be checked at all, marks the suite
/// failed and the next suite still runs.
pub fn run_suites(
    session: &Session,
    exec: &dyn Executor,
    suites: &[BenchmarkSuite],
) -> Vec<RunResult> {
    let cache = shader_cache(session);
    let mut results = Vec::with_capacity(suites.len());
    // defines the artifacts on disk were built with; unknown at session start
    let mut built_with: Option<Vec<Define>> = None;

    for (i, suite) in suites.iter().enumerate() {
        output::status(
            "Suite",
            format!("[{}/{}] {} - {}", i + 1, suites.len(), suite.name, suite.description),
        );

        let force = built_with.as_deref() != Some(suite.shader_defines.as_slice());
        let shader_failures = match cache.ensure_compiled(exec, force, &suite.shader_defines) {
            Ok(CacheOutcome::Unchanged(_)) => {
                output::step("No changes in shaders");
                Vec::new()
            }
            Ok(CacheOutcome::Compiled { report, .. }) => {
                output::step(format!("Compiled {} shader(s)", report.compiled.len()));
                for f in &report.failed {
                    output::warn(format!("{}: {}", f.source.display(), f.reason));
                }
                built_with = Some(suite.shader_defines.clone());
                report.failed_sources()
            }
            Err(e) => {
                output::fail("FAIL", format!("{}: {:#}", suite.name, e));
                built_with = None;
                results.push(RunResult::failed(
                    suite,
                    SuiteOutcome::ShaderCacheFailed {
                        reason: format!("{e:#}"),
                    },
                ));
                continue;
            }
        };

        output::step(format!("Building {} {}", suite.build.profile, suite.build.platform));
        let status = toolchain::build(exec, &session.toolchain, &suite.build);
        match &status {
            toolchain::BuildStatus::Succeeded => {}
            toolchain::BuildStatus::Failed { code, log_tail } => {
                output::fail(
                    "FAIL",
                    format!("{}: failed to build (exit {:?})", suite.name, status.code()),
                );
                for line in log_tail.lines() {
                    output::step(line);
                }
                let mut r = RunResult::failed(suite, SuiteOutcome::BuildFailed { status: *code });
                r.shader_failures = shader_failures;
                results.push(r);
                continue;
            }
            toolchain::BuildStatus::Aborted(reason) => {
                output::fail("FAIL", format!("{}: failed to build ({})", suite.name, reason));
                let mut r = RunResult::failed(suite, SuiteOutcome::BuildFailed { status: None });
                r.shader_failures = shader_failures;
                results.push(r);
                continue;
            }
        }

        output::step(format!("Running {}", suite.scenario.to_args().join(" ")));
        let mut r =
            runner::run_scenario(exec, &session.application, suite, &session.results_dir);
        r.shader_failures = shader_failures;
        match &r.outcome {
            SuiteOutcome::Passed => {
                output::status("PASS", format!("{} (run {})", suite.name, r.id))
            }
            SuiteOutcome::RunFailed { reason } => {
                output::fail("FAIL", format!("{}: {}", suite.name, reason))
            }
            _ => {}
        }
        results.push(r);
    }

    results
}

/// Runs (or reloads) an experiment and records the session manifest.
pub fn run(
    cfg: &AppConfig,
    exec: &dyn Executor,
    name: &str,
    only: &[String],
) -> Result<SessionManifest> {
    let s = &cfg.session;

    if s.use_premade_results {
        let path = results::manifest_path(&s.results_dir);
        let manifest = results::load_manifest(&path)?;
        if manifest.experiment != name {
            bail!(
                "premade results in {} are for '{}', not '{}'",
                path.display(),
                manifest.experiment,
                name
            );
        }
        output::status("Reusing", path.display().to_string());
        print_summary(&manifest);
        return Ok(manifest);
    }

    require_shader_dir(s)?;
    let experiment = variants::generate(name, &s.baseline, &s.custom_experiments)?;
    let experiment = select_suites(experiment, only)?;

    output::status(
        "Experiment",
        format!("{} ({} suites)", experiment.name, experiment.suites.len()),
    );
    let started_at = now_rfc3339();
    let results = run_suites(s, exec, &experiment.suites);

    let manifest = SessionManifest {
        experiment: experiment.name,
        started_at,
        finished_at: now_rfc3339(),
        host: hw::detect_host(),
        results,
    };

    if s.save_manifest {
        let p = results::save_manifest(&s.results_dir, &manifest)?;
        output::status("Saved", p.display().to_string());
    }
    print_summary(&manifest);
    Ok(manifest)
}

/// Exit code for a finished session: 0, or the last failed build's status, or 1.
pub fn exit_code(manifest: &SessionManifest) -> i32 {
    let mut build_code = None;
    let mut any_failed = false;
    for r in &manifest.results {
        match &r.outcome {
            SuiteOutcome::Passed => {}
            SuiteOutcome::BuildFailed { status: Some(c) } if *c != 0 => {
                build_code = Some(*c);
                any_failed = true;
            }
            _ => any_failed = true,
        }
    }
    match build_code {
        Some(c) => c,
        None if any_failed => 1,
        None => 0,
    }
}

/* =========================
   Summary
   ========================= */

pub fn summarize(cfg: &AppConfig, manifest: Option<PathBuf>) -> Result<()> {
    let path = manifest.unwrap_or_else(|| results::manifest_path(&cfg.session.results_dir));
    let m = results::load_manifest(&path)?;
    print_summary(&m);
    Ok(())
}

fn print_summary(m: &SessionManifest) {
    let passed = m.results.iter().filter(|r| r.outcome.is_passed()).count();
    println!("\n=== {} ({}/{} passed) ===", m.experiment, passed, m.results.len());

    for r in &m.results {
        let state = match &r.outcome {
            SuiteOutcome::Passed => "ok",
            SuiteOutcome::ShaderCacheFailed { .. } => "shader-cache",
            SuiteOutcome::BuildFailed { .. } => "build-failed",
            SuiteOutcome::RunFailed { .. } => "run-failed",
        };
        println!("  {:<28} {:<14} {}", r.description, state, r.id);
        for f in &r.shader_failures {
            println!("      shader failed: {}", f.display());
        }
    }

    for (r, summary) in results::summarize_results(&m.results) {
        println!("\n--- {} (run {}) ---", r.description, r.id);
        let s = match summary {
            Ok(s) => s,
            Err(e) => {
                println!("  unreadable measurements: {:#}", e);
                continue;
            }
        };
        println!("  files={} rows={}", s.files.len(), s.rows);

        // known frame columns first, then anything extra the run wrote
        let known = FRAME_COLUMNS.iter().filter_map(|c| s.columns.get_key_value(*c));
        let extra = s
            .columns
            .iter()
            .filter(|(k, _)| !FRAME_COLUMNS.contains(&k.as_str()));
        for (name, st) in known.chain(extra) {
            println!(
                "  {:<16} mean={:>12.4} max={:>12.4} n={}",
                name, st.mean, st.max, st.samples
            );
        }
    }
}
