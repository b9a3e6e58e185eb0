use crate::process::{Executor, Invocation};
use crate::types::{BenchmarkSuite, RunId, RunResult, SuiteOutcome};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the application reports the id of the run it just recorded.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    /// A line on stdout matched by `id_pattern`; exit status must be 0.
    Stdout,
    /// A positive exit code is the id.
    ExitCode,
}

#[derive(Clone, Debug)]
pub struct ApplicationSettings {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub id_source: IdSource,
    pub id_pattern: String,
    pub timeout: Option<Duration>,
}

fn extract_id(
    settings: &ApplicationSettings,
    code: Option<i32>,
    stdout: &str,
) -> Result<String, String> {
    match settings.id_source {
        IdSource::ExitCode => match code {
            Some(n) if n > 0 => Ok(n.to_string()),
            other => Err(format!("application exited with {other:?}, no run id")),
        },
        IdSource::Stdout => {
            if code != Some(0) {
                return Err(format!("application exited with {code:?}"));
            }
            let re = Regex::new(&settings.id_pattern).map_err(|e| e.to_string())?;
            re.captures(stdout)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| "no run id in application output".to_string())
        }
    }
}

/// Id is used as a directory name under the results root.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Runs one scenario to completion (or timeout) and locates its measurements.
pub fn run_scenario(
    exec: &dyn Executor,
    settings: &ApplicationSettings,
    suite: &BenchmarkSuite,
    results_dir: &Path,
) -> RunResult {
    let inv = Invocation::new(&settings.executable)
        .args(suite.scenario.to_args())
        .cwd(Some(settings.working_dir.as_path()))
        .timeout(settings.timeout);

    let out = match exec.execute(&inv) {
        Ok(out) => out,
        Err(e) => {
            return RunResult::failed(suite, SuiteOutcome::RunFailed { reason: e.to_string() });
        }
    };

    let id = match extract_id(settings, out.code, &out.stdout) {
        Ok(id) if is_safe_id(&id) => id,
        Ok(id) => {
            return RunResult::failed(
                suite,
                SuiteOutcome::RunFailed {
                    reason: format!("unusable run id '{id}'"),
                },
            );
        }
        Err(reason) => return RunResult::failed(suite, SuiteOutcome::RunFailed { reason }),
    };

    let dir = results_dir.join(&id);
    if !dir.is_dir() {
        return RunResult::failed(
            suite,
            SuiteOutcome::RunFailed {
                reason: format!("run {id} wrote no measurement directory {}", dir.display()),
            },
        );
    }

    log::info!("suite {} -> run {} ({:.1}s)", suite.name, id, out.elapsed.as_secs_f64());
    RunResult {
        suite: suite.name.clone(),
        description: suite.description.clone(),
        id: RunId::Assigned(id),
        outcome: SuiteOutcome::Passed,
        output_dir: Some(dir),
        shader_failures: Vec::new(),
    }
}
