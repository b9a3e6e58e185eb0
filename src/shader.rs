use crate::process::{Executor, Invocation};
use crate::types::{Define, ShaderSource, ShaderStage};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Name markers of compiler output and editor/backup leftovers.
const EXCLUDED_MARKERS: &[&str] = &[".spv", ".bak", ".orig", ".tmp", "~"];

#[derive(Clone, Debug)]
pub struct ShaderCompilerSettings {
    pub program: PathBuf,
    pub strict_flag: String,
    pub target_env: String,
    /// Flat output directory; `None` writes each artifact next to its source.
    pub artifact_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct CompileFailure {
    pub source: PathBuf,
    pub reason: String,
}

/// Outcome of compiling a whole directory: every file is attempted.
#[derive(Clone, Debug, Default)]
pub struct CompileReport {
    pub compiled: Vec<PathBuf>,
    pub failed: Vec<CompileFailure>,
}

impl CompileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_sources(&self) -> Vec<PathBuf> {
        self.failed.iter().map(|f| f.source.clone()).collect()
    }
}

/// Artifact or backup file; must be checked before `recognize`.
pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_MARKERS.iter().any(|m| name.contains(m))
}

/// Stage from the right-most stage marker in `name`, plus the text before it.
pub fn recognize(name: &str) -> Option<(ShaderStage, &str)> {
    ShaderStage::ALL
        .iter()
        .filter_map(|&stage| name.rfind(stage.marker()).map(|pos| (pos, stage)))
        .max_by_key(|(pos, _)| *pos)
        .filter(|(pos, _)| *pos > 0)
        .map(|(pos, stage)| (stage, &name[..pos]))
}

/// Recognized shader sources under `dir`, in file-name order.
pub fn discover_sources(dir: &Path) -> Result<Vec<ShaderSource>> {
    let mut out = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };

        if is_excluded(name) {
            continue;
        }
        let Some((stage, stem)) = recognize(name) else {
            continue;
        };

        out.push(ShaderSource {
            path: entry.path().to_path_buf(),
            stage,
            stem: stem.to_string(),
        });
    }

    Ok(out)
}

pub fn compile_invocation(
    settings: &ShaderCompilerSettings,
    source: &ShaderSource,
    defines: &[Define],
) -> Invocation {
    let output = source.artifact_path(settings.artifact_dir.as_deref());

    Invocation::new(&settings.program)
        .arg(&settings.strict_flag)
        .arg("--target-env")
        .arg(&settings.target_env)
        .args(defines.iter().map(|d| format!("-D{d}")))
        .arg("-o")
        .arg(output)
        .arg(&source.path)
        .timeout(settings.timeout)
}

/// Compiles every recognized source once. A failing file never stops the rest.
pub fn compile_dir(
    exec: &dyn Executor,
    settings: &ShaderCompilerSettings,
    dir: &Path,
    defines: &[Define],
) -> Result<CompileReport> {
    let sources = discover_sources(dir)?;

    if let Some(out) = &settings.artifact_dir {
        std::fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    }

    let mut report = CompileReport::default();
    for src in &sources {
        let inv = compile_invocation(settings, src, defines);

        match exec.execute(&inv) {
            Ok(out) if out.success() => {
                log::debug!("compiled {}", src.path.display());
                report.compiled.push(src.path.clone());
            }
            Ok(out) => {
                let reason = first_line(&out.stdout)
                    .or_else(|| first_line(&out.stderr))
                    .unwrap_or_else(|| format!("exit status {:?}", out.code));
                report.failed.push(CompileFailure {
                    source: src.path.clone(),
                    reason,
                });
            }
            Err(e) => report.failed.push(CompileFailure {
                source: src.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    Ok(report)
}

fn first_line(s: &str) -> Option<String> {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
