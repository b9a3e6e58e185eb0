use crate::process::{Executor, Invocation};
use crate::types::BuildConfiguration;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ToolchainSettings {
    pub program: PathBuf,
    pub project_file: PathBuf,
    pub out_dir: PathBuf,
    pub int_dir: PathBuf,
    pub define_flag: String,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

/// Toolchain exit status, as reported.
#[derive(Clone, Debug)]
pub enum BuildStatus {
    Succeeded,
    Failed { code: Option<i32>, log_tail: String },
    /// Could not launch, or killed on timeout.
    Aborted(String),
}

impl BuildStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            BuildStatus::Succeeded => Some(0),
            BuildStatus::Failed { code, .. } => *code,
            BuildStatus::Aborted(_) => None,
        }
    }
}

/// `{index}` / `{key}` / `{value}` substitution; index is 0-based position in the list.
pub fn render_define_flag(template: &str, index: usize, key: &str, value: &str) -> String {
    template
        .replace("{index}", &index.to_string())
        .replace("{key}", key)
        .replace("{value}", value)
}

/// Directory property with a trailing separator, which MSBuild expects.
fn dir_prop(name: &str, dir: &std::path::Path) -> OsString {
    let mut s = OsString::from(format!("-p:{name}="));
    s.push(dir.as_os_str());
    if !dir.as_os_str().to_string_lossy().ends_with(['/', '\\']) {
        s.push(std::path::MAIN_SEPARATOR_STR);
    }
    s
}

pub fn build_args(settings: &ToolchainSettings, config: &BuildConfiguration) -> Vec<OsString> {
    let mut args = vec![
        settings.project_file.clone().into_os_string(),
        OsString::from(format!("-p:Configuration={}", config.profile)),
        OsString::from(format!("-p:Platform={}", config.platform)),
        dir_prop("OutDir", &settings.out_dir),
        dir_prop("IntDir", &settings.int_dir),
    ];

    args.extend(config.defines.iter().enumerate().map(|(i, d)| {
        OsString::from(render_define_flag(&settings.define_flag, i, &d.key, &d.value))
    }));
    args
}

/// Builds (or refreshes) the application for `config`.
pub fn build(
    exec: &dyn Executor,
    settings: &ToolchainSettings,
    config: &BuildConfiguration,
) -> BuildStatus {
    let inv = Invocation::new(&settings.program)
        .args(build_args(settings, config))
        .cwd(Some(settings.working_dir.as_path()))
        .timeout(settings.timeout);

    match exec.execute(&inv) {
        Ok(out) if out.success() => BuildStatus::Succeeded,
        Ok(out) => BuildStatus::Failed {
            code: out.code,
            log_tail: tail(&out.stdout, 20),
        },
        Err(e) => BuildStatus::Aborted(e.to_string()),
    }
}

fn tail(s: &str, lines: usize) -> String {
    let all: Vec<&str> = s.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{exit, FakeExecutor};
    use crate::process::ProcessError;
    use crate::types::Define;

    fn settings() -> ToolchainSettings {
        ToolchainSettings {
            program: PathBuf::from("msbuild"),
            project_file: PathBuf::from("/p/ImperialEngine.vcxproj"),
            out_dir: PathBuf::from("/p/bin"),
            int_dir: PathBuf::from("/p/obj/"),
            define_flag: "-p:Define{index}={key}={value}".to_string(),
            working_dir: PathBuf::from("/p"),
            timeout: None,
        }
    }

    fn config() -> BuildConfiguration {
        BuildConfiguration {
            profile: "Release".to_string(),
            platform: "x64".to_string(),
            defines: vec![Define::new("LOD_ENABLED", "0"), Define::new("BENCHMARK_MODE", "1")],
        }
    }

    #[test]
    fn args_keep_define_order_and_index() {
        let args: Vec<String> = build_args(&settings(), &config())
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let sep = std::path::MAIN_SEPARATOR_STR;
        assert_eq!(args[0], "/p/ImperialEngine.vcxproj");
        assert_eq!(args[1], "-p:Configuration=Release");
        assert_eq!(args[2], "-p:Platform=x64");
        assert_eq!(args[3], format!("-p:OutDir=/p/bin{sep}"));
        assert_eq!(args[4], "-p:IntDir=/p/obj/");
        assert_eq!(args[5], "-p:Define0=LOD_ENABLED=0");
        assert_eq!(args[6], "-p:Define1=BENCHMARK_MODE=1");
    }

    #[test]
    fn plain_d_template() {
        assert_eq!(render_define_flag("-D{key}={value}", 4, "A", "1"), "-DA=1");
    }

    #[test]
    fn status_is_passed_through() {
        let exec = FakeExecutor::new();
        exec.push(Box::new(|_| Ok(exit(1, "error C2065: undeclared identifier"))));

        let status = build(&exec, &settings(), &config());
        assert_eq!(status.code(), Some(1));
        assert!(matches!(status, BuildStatus::Failed { .. }));

        assert!(matches!(build(&exec, &settings(), &config()), BuildStatus::Succeeded));
        assert_eq!(exec.programs(), ["msbuild", "msbuild"]);
    }

    #[test]
    fn timeout_aborts() {
        let exec = FakeExecutor::with_fallback(Box::new(|_| {
            Err(ProcessError::TimedOut {
                program: "msbuild".to_string(),
                timeout: Duration::from_secs(1),
            })
        }));
        let status = build(&exec, &settings(), &config());
        assert!(matches!(status, BuildStatus::Aborted(_)));
        assert_eq!(status.code(), None);
    }
}
