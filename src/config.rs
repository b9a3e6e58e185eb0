use crate::cache::DEFAULT_STATE_FILE;
use crate::runner::{ApplicationSettings, IdSource};
use crate::shader::ShaderCompilerSettings;
use crate::toolchain::ToolchainSettings;
use crate::types::{BuildConfiguration, Define, FlagValue, MAX_FILE_COUNT, Scenario, Toggle};
use crate::variants::{self, Baseline};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Session settings as written in YAML. Every field has a default.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub project_root: Option<PathBuf>,
    pub shader_dir: PathBuf,
    pub state_file: String,
    pub shader_compiler: ShaderCompilerConfig,
    pub toolchain: ToolchainConfig,
    pub application: ApplicationConfig,
    pub results_dir: PathBuf,
    /// Reuse the last session manifest instead of building and running.
    pub use_premade_results: bool,
    pub save_manifest: bool,
    pub baseline: BaselineConfig,
    pub experiments: Vec<CustomExperiment>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaderCompilerConfig {
    pub program: Option<PathBuf>,
    pub strict_flag: String,
    pub target_env: String,
    pub artifact_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    pub program: PathBuf,
    pub project_file: PathBuf,
    pub out_dir: PathBuf,
    pub int_dir: PathBuf,
    /// `{index}`, `{key}` and `{value}` are substituted per define.
    pub define_flag: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationConfig {
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub id_source: IdSource,
    pub id_pattern: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaselineConfig {
    pub profile: String,
    pub platform: String,
    pub defines: Vec<Define>,
    /// Keys of `defines` that the shaders read.
    pub shader_keys: Vec<String>,
    pub scenario: Scenario,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomExperiment {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub suites: Vec<CustomSuite>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomSuite {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub toggles: Vec<Toggle>,
    pub scenario: Option<Scenario>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            shader_dir: PathBuf::from("Shaders"),
            state_file: DEFAULT_STATE_FILE.to_string(),
            shader_compiler: ShaderCompilerConfig::default(),
            toolchain: ToolchainConfig::default(),
            application: ApplicationConfig::default(),
            results_dir: PathBuf::from("Testing/Results"),
            use_premade_results: false,
            save_manifest: true,
            baseline: BaselineConfig::default(),
            experiments: Vec::new(),
        }
    }
}

impl Default for ShaderCompilerConfig {
    fn default() -> Self {
        Self {
            program: None,
            strict_flag: "-V".to_string(),
            target_env: "vulkan1.3".to_string(),
            artifact_dir: None,
            timeout_secs: 120,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("msbuild"),
            project_file: PathBuf::from("ImperialEngine.vcxproj"),
            out_dir: PathBuf::from("../bin/x64/Release"),
            int_dir: PathBuf::from("../obj/x64/Release"),
            define_flag: "-p:Define{index}={key}={value}".to_string(),
            timeout_secs: 1800,
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("../bin/x64/Release/ImperialEngine.exe"),
            working_dir: None,
            id_source: IdSource::Stdout,
            id_pattern: r"(?m)^\s*run[-_ ]?id\s*[:=]\s*(\S+)\s*$".to_string(),
            timeout_secs: 1800,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        let on = |k: &str| Define::new(k, FlagValue::ON.render());
        let off = |k: &str| Define::new(k, FlagValue::OFF.render());
        Self {
            profile: "Release".to_string(),
            platform: "x64".to_string(),
            defines: vec![
                on("BENCHMARK_MODE"),
                off("CPU_CULL_ST"),
                on("LOD_ENABLED"),
                on("CONE_CULLING_ENABLED"),
                off("DEBUG_MESH"),
                Define::new("MESHLET_MAX_VERTS", "64"),
                Define::new("MESHLET_MAX_PRIMS", "124"),
            ],
            shader_keys: [
                "LOD_ENABLED",
                "CONE_CULLING_ENABLED",
                "DEBUG_MESH",
                "MESHLET_MAX_VERTS",
                "MESHLET_MAX_PRIMS",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            scenario: Scenario::default(),
        }
    }
}

/// `path` if given (must exist), otherwise defaults.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parse config {}", path.display()))
}

fn check_scenario(sc: &Scenario, owner: &str) -> Result<()> {
    match sc.file_count {
        Some(n) if n > MAX_FILE_COUNT => {
            bail!("{owner}: file_count {n} is above the limit of {MAX_FILE_COUNT}")
        }
        _ => Ok(()),
    }
}

fn secs(n: u64) -> Option<Duration> {
    (n > 0).then(|| Duration::from_secs(n))
}

/// Resolved, ready-to-use session. Relative paths are joined onto the project root.
#[derive(Clone, Debug)]
pub struct Session {
    pub project_root: PathBuf,
    pub shader_dir: PathBuf,
    pub state_file: String,
    pub compiler: ShaderCompilerSettings,
    pub toolchain: ToolchainSettings,
    pub application: ApplicationSettings,
    pub results_dir: PathBuf,
    pub use_premade_results: bool,
    pub save_manifest: bool,
    pub baseline: Baseline,
    pub custom_experiments: Vec<CustomExperiment>,
}

impl SessionConfig {
    /// `vk_sdk` is the value of `VK_SDK_PATH`, if set.
    pub fn resolve(
        self,
        root_override: Option<PathBuf>,
        vk_sdk: Option<PathBuf>,
    ) -> Result<Session> {
        let project_root = root_override
            .or(self.project_root)
            .unwrap_or_else(|| PathBuf::from("."));
        let abs = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                project_root.join(p)
            }
        };

        let compiler_program = match (self.shader_compiler.program, vk_sdk) {
            (Some(p), _) => p,
            (None, Some(sdk)) => sdk.join("Bin").join("glslangValidator"),
            (None, None) => PathBuf::from("glslangValidator"),
        };

        // validate once here so a bad pattern fails before any build starts
        regex::Regex::new(&self.application.id_pattern)
            .with_context(|| format!("invalid id_pattern '{}'", self.application.id_pattern))?;

        variants::check_custom(&self.experiments)?;
        check_scenario(&self.baseline.scenario, "baseline scenario")?;
        for e in &self.experiments {
            for suite in &e.suites {
                if let Some(sc) = &suite.scenario {
                    check_scenario(sc, &format!("suite {}/{}", e.name, suite.name))?;
                }
            }
        }

        let b = self.baseline;
        let baseline = Baseline {
            build: BuildConfiguration {
                profile: b.profile,
                platform: b.platform,
                defines: b.defines,
            },
            shader_keys: b.shader_keys,
            scenario: b.scenario,
        };

        Ok(Session {
            shader_dir: abs(&self.shader_dir),
            state_file: self.state_file,
            compiler: ShaderCompilerSettings {
                program: compiler_program,
                strict_flag: self.shader_compiler.strict_flag,
                target_env: self.shader_compiler.target_env,
                artifact_dir: self.shader_compiler.artifact_dir.as_deref().map(&abs),
                timeout: secs(self.shader_compiler.timeout_secs),
            },
            toolchain: ToolchainSettings {
                program: self.toolchain.program,
                project_file: abs(&self.toolchain.project_file),
                out_dir: abs(&self.toolchain.out_dir),
                int_dir: abs(&self.toolchain.int_dir),
                define_flag: self.toolchain.define_flag,
                working_dir: project_root.clone(),
                timeout: secs(self.toolchain.timeout_secs),
            },
            application: ApplicationSettings {
                executable: abs(&self.application.executable),
                working_dir: abs(self.application.working_dir.as_deref().unwrap_or(Path::new("."))),
                id_source: self.application.id_source,
                id_pattern: self.application.id_pattern,
                timeout: secs(self.application.timeout_secs),
            },
            results_dir: abs(&self.results_dir),
            use_premade_results: self.use_premade_results,
            save_manifest: self.save_manifest,
            baseline,
            custom_experiments: self.experiments,
            project_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg: SessionConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.state_file, ".dirhash");
        assert_eq!(cfg.shader_compiler.timeout_secs, 120);
        assert_eq!(cfg.baseline.defines.len(), 7);
    }

    #[test]
    fn parses_ordered_defines_and_custom_experiments() {
        let yaml = r#"
project_root: /work/ImperialEngine
use_premade_results: true
baseline:
  profile: Development
  defines: ["B=1", "A=0", "DEBUG_MESH"]
  shader_keys: [A]
experiments:
  - name: lod-only
    suites:
      - name: lod-off
        description: LOD disabled
        toggles:
          - { key: LOD_ENABLED, value: false }
          - { key: MESHLET_MAX_VERTS, value: 128 }
"#;
        let cfg: SessionConfig = serde_yaml::from_str(yaml).unwrap();
        let keys: Vec<_> = cfg.baseline.defines.iter().map(|d| d.to_string()).collect();
        assert_eq!(keys, ["B=1", "A=0", "DEBUG_MESH=1"]);
        assert_eq!(cfg.baseline.platform, "x64");
        assert!(cfg.use_premade_results);

        let suite = &cfg.experiments[0].suites[0];
        assert_eq!(suite.toggles[0].value, FlagValue::OFF);
        assert_eq!(suite.toggles[1].value, FlagValue::Level(128));
        assert!(suite.scenario.is_none());
    }

    #[test]
    fn resolve_joins_relative_paths_and_uses_sdk() {
        let cfg = SessionConfig::default();
        let session = cfg
            .resolve(Some(PathBuf::from("/proj")), Some(PathBuf::from("/sdk")))
            .unwrap();
        assert_eq!(session.shader_dir, PathBuf::from("/proj/Shaders"));
        assert_eq!(session.results_dir, PathBuf::from("/proj/Testing/Results"));
        assert_eq!(session.compiler.program, PathBuf::from("/sdk/Bin/glslangValidator"));
        assert_eq!(session.application.working_dir, PathBuf::from("/proj/."));
        assert_eq!(session.toolchain.timeout, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let mut cfg = SessionConfig::default();
        cfg.application.timeout_secs = 0;
        let session = cfg.resolve(None, None).unwrap();
        assert!(session.application.timeout.is_none());
    }

    #[test]
    fn documented_layout_loads() {
        let yaml = r#"
project_root: /work/ImperialEngine
shader_dir: Shaders
state_file: .dirhash
shader_compiler:
  strict_flag: -V
  target_env: vulkan1.3
  artifact_dir: Shaders/bin
  timeout_secs: 60
toolchain:
  program: msbuild
  project_file: ImperialEngine/ImperialEngine.vcxproj
  out_dir: bin/x64/Release
  int_dir: obj/x64/Release
  define_flag: "-p:Define{index}={key}={value}"
  timeout_secs: 0
application:
  executable: bin/x64/Release/ImperialEngine.exe
  id_source: exit_code
  timeout_secs: 900
results_dir: Testing/Results
use_premade_results: false
save_manifest: true
baseline:
  profile: Release
  platform: x64
  defines: [BENCHMARK_MODE=1, LOD_ENABLED=1]
  shader_keys: [LOD_ENABLED]
  scenario:
    files: [Scene/Bunny.glb, Scene/Dragon.glb]
    file_count: 8
    distribution: random
    camera: static
    frames: 500
experiments:
  - name: lod-only
    description: LOD on and off
    suites:
      - name: lod-off
        toggles: [{ key: LOD_ENABLED, value: false }]
"#;
        let session = serde_yaml::from_str::<SessionConfig>(yaml)
            .unwrap()
            .resolve(None, None)
            .unwrap();
        assert_eq!(session.application.id_source, IdSource::ExitCode);
        assert!(session.toolchain.timeout.is_none());
        assert_eq!(session.baseline.build.profile, "Release");
        assert_eq!(session.baseline.scenario.file_count, Some(8));
        assert_eq!(session.custom_experiments[0].suites[0].name, "lod-off");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let stray_top = "scenario:\n  frames: 10\n";
        assert!(serde_yaml::from_str::<SessionConfig>(stray_top).is_err());

        let stray_nested = "toolchain:\n  configuration: Release\n";
        assert!(serde_yaml::from_str::<SessionConfig>(stray_nested).is_err());

        let stray_scenario = "baseline:\n  scenario:\n    frame: 10\n";
        assert!(serde_yaml::from_str::<SessionConfig>(stray_scenario).is_err());
    }

    #[test]
    fn oversized_file_count_is_rejected() {
        let mut cfg = SessionConfig::default();
        cfg.baseline.scenario.file_count = Some(u32::MAX);
        assert!(cfg.resolve(None, None).is_err());
    }

    #[test]
    fn custom_experiment_cannot_reuse_builtin_name() {
        let yaml = r#"
experiments:
  - name: triangle-scaling
    suites:
      - name: x
"#;
        let cfg: SessionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.resolve(None, None).is_err());
    }

    #[test]
    fn bad_id_pattern_is_rejected() {
        let mut cfg = SessionConfig::default();
        cfg.application.id_pattern = "(".to_string();
        assert!(cfg.resolve(None, None).is_err());
    }
}
