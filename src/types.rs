use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/* =========================
   Fingerprint
   ========================= */

/// blake3 digest, lowercase hex.
pub const FINGERPRINT_HEX_LEN: usize = 64;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hash(hash: blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }

    /// Accepts exactly one fixed-width hex digest; anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == FINGERPRINT_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/* =========================
   Defines + build configuration
   ========================= */

/// One `NAME=VALUE` preprocessor define.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Define {
    pub key: String,
    pub value: String,
}

impl Define {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Define {
    type Err = String;

    /// `NAME=VALUE`, or a bare `NAME` meaning `NAME=1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (key, value) = match s.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (s, "1"),
        };

        let valid_key = key
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(format!("invalid define name in '{s}'"));
        }

        Ok(Define::new(key, value))
    }
}

impl TryFrom<String> for Define {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Define> for String {
    fn from(d: Define) -> Self {
        d.to_string()
    }
}

impl fmt::Display for Define {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Values a feature toggle may take: a switch or a small tuning level.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Switch(bool),
    Level(u32),
}

impl FlagValue {
    pub const ON: FlagValue = FlagValue::Switch(true);
    pub const OFF: FlagValue = FlagValue::Switch(false);

    pub fn render(self) -> String {
        match self {
            FlagValue::Switch(true) => "1".to_string(),
            FlagValue::Switch(false) => "0".to_string(),
            FlagValue::Level(n) => n.to_string(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Toggle {
    pub key: String,
    pub value: FlagValue,
}

impl Toggle {
    pub fn new(key: impl Into<String>, value: FlagValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Build profile + platform + ordered defines.
///
/// Define order is part of the value: the toolchain receives them indexed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfiguration {
    pub profile: String,
    pub platform: String,
    #[serde(default)]
    pub defines: Vec<Define>,
}

impl BuildConfiguration {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.value.as_str())
    }

    /// Overwrites in place (keeping position) or appends a new key at the end.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.defines.iter_mut().find(|d| d.key == key) {
            Some(d) => d.value = value,
            None => self.defines.push(Define::new(key, value)),
        }
    }

    pub fn apply(&mut self, toggle: &Toggle) {
        self.set(&toggle.key, toggle.value.render());
    }

    /// Subset of defines whose key is listed in `keys`, in configuration order.
    pub fn select(&self, keys: &[String]) -> Vec<Define> {
        self.defines
            .iter()
            .filter(|d| keys.iter().any(|k| k == &d.key))
            .cloned()
            .collect()
    }
}

/* =========================
   Shaders
   ========================= */

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Mesh,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 4] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Mesh,
        ShaderStage::Compute,
    ];

    /// Name marker, e.g. `.vert` in `basic.vert` or `basic.vert.glsl`.
    pub fn marker(self) -> &'static str {
        match self {
            ShaderStage::Vertex => ".vert",
            ShaderStage::Fragment => ".frag",
            ShaderStage::Mesh => ".mesh",
            ShaderStage::Compute => ".comp",
        }
    }
}

/// Recognized shader source file and the stage inferred from its name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub stage: ShaderStage,
    /// File name up to (not including) the stage marker.
    pub stem: String,
}

impl ShaderSource {
    pub fn artifact_name(&self) -> String {
        format!("{}{}.spv", self.stem, self.stage.marker())
    }

    /// `<dir>/<stem><marker>.spv`, where `dir` is `artifact_dir` or the source's own folder.
    pub fn artifact_path(&self, artifact_dir: Option<&Path>) -> PathBuf {
        let dir = artifact_dir
            .or_else(|| self.path.parent())
            .unwrap_or_else(|| Path::new("."));
        dir.join(self.artifact_name())
    }
}

/* =========================
   Benchmarks
   ========================= */

/// Upper bound for `Scenario::file_count`.
pub const MAX_FILE_COUNT: u32 = 10_000;

/// Scenario flags understood by the rendering application.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    pub files: Vec<String>,
    /// Total files to load, cycling through `files`; `None` loads each once.
    /// At most `MAX_FILE_COUNT`.
    pub file_count: Option<u32>,
    pub distribution: String,
    pub camera: String,
    pub frames: u32,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            files: vec!["Scene/Bunny.glb".to_string()],
            file_count: None,
            distribution: "grid".to_string(),
            camera: "orbit".to_string(),
            frames: 1000,
        }
    }
}

impl Scenario {
    pub fn to_args(&self) -> Vec<String> {
        let count = self.file_count.unwrap_or(self.files.len() as u32);
        let mut args = Vec::new();

        if !self.files.is_empty() && count > 0 {
            args.push("--load-files".to_string());
            let mut loaded = 0;
            while loaded < count {
                for f in &self.files {
                    if loaded == count {
                        break;
                    }
                    args.push(f.clone());
                    loaded += 1;
                }
            }
            args.push("--file-count".to_string());
            args.push(count.to_string());
        }

        args.push("--distribution".to_string());
        args.push(self.distribution.clone());
        args.push("--camera".to_string());
        args.push(self.camera.clone());
        args.push("--run-for".to_string());
        args.push(self.frames.to_string());
        args
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    pub name: String,
    pub description: String,
    pub build: BuildConfiguration,
    /// Defines passed to the shader compiler for this suite.
    pub shader_defines: Vec<Define>,
    pub scenario: Scenario,
}

/// Identifier the application assigned to a run, or the failure sentinel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunId {
    Assigned(String),
    Failed,
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunId::Assigned(id) => f.write_str(id),
            RunId::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuiteOutcome {
    Passed,
    /// The shader directory could not be fingerprinted or its state saved.
    ShaderCacheFailed { reason: String },
    BuildFailed { status: Option<i32> },
    RunFailed { reason: String },
}

impl SuiteOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, SuiteOutcome::Passed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub suite: String,
    pub description: String,
    pub id: RunId,
    pub outcome: SuiteOutcome,
    /// Only ever set together with an assigned id.
    pub output_dir: Option<PathBuf>,
    /// Shader sources that failed to compile before this suite was built.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shader_failures: Vec<PathBuf>,
}

impl RunResult {
    pub fn failed(suite: &BenchmarkSuite, outcome: SuiteOutcome) -> Self {
        Self {
            suite: suite.name.clone(),
            description: suite.description.clone(),
            id: RunId::Failed,
            outcome,
            output_dir: None,
            shader_failures: Vec::new(),
        }
    }

    /// Directory holding this run's measurement files; `None` for failed runs.
    pub fn measurement_dir(&self) -> Option<&Path> {
        match (&self.id, &self.outcome) {
            (RunId::Assigned(_), SuiteOutcome::Passed) => self.output_dir.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_parsing() {
        assert_eq!("LOD_ENABLED=0".parse::<Define>(), Ok(Define::new("LOD_ENABLED", "0")));
        assert_eq!("DEBUG_MESH".parse::<Define>(), Ok(Define::new("DEBUG_MESH", "1")));
        assert_eq!(" A = b ".parse::<Define>(), Ok(Define::new("A", "b")));
        assert!("1BAD=2".parse::<Define>().is_err());
        assert!("=2".parse::<Define>().is_err());
        assert!("A-B=2".parse::<Define>().is_err());
    }

    #[test]
    fn set_keeps_position_and_appends_new_keys() {
        let mut cfg = BuildConfiguration {
            profile: "Release".to_string(),
            platform: "x64".to_string(),
            defines: vec![Define::new("A", "1"), Define::new("B", "1")],
        };
        cfg.set("A", "0");
        cfg.set("C", "7");

        let keys: Vec<_> = cfg.defines.iter().map(|d| d.to_string()).collect();
        assert_eq!(keys, ["A=0", "B=1", "C=7"]);
    }

    #[test]
    fn artifact_path_is_next_to_source_by_default() {
        let src = ShaderSource {
            path: PathBuf::from("shaders/glsl/a.vert"),
            stage: ShaderStage::Vertex,
            stem: "a".to_string(),
        };
        assert_eq!(src.artifact_path(None), PathBuf::from("shaders/glsl/a.vert.spv"));
        assert_eq!(
            src.artifact_path(Some(Path::new("out"))),
            PathBuf::from("out/a.vert.spv")
        );
    }

    #[test]
    fn fingerprint_parse_rejects_wrong_width() {
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse(&"g".repeat(64)).is_none());
        let fp = Fingerprint::parse(&"AB".repeat(32)).unwrap();
        assert_eq!(fp.as_str(), "ab".repeat(32));
    }

    #[test]
    fn scenario_args_repeat_files_up_to_count() {
        let sc = Scenario {
            files: vec!["a.glb".to_string(), "b.glb".to_string()],
            file_count: Some(3),
            distribution: "random".to_string(),
            camera: "static".to_string(),
            frames: 50,
        };
        assert_eq!(
            sc.to_args(),
            [
                "--load-files", "a.glb", "b.glb", "a.glb", "--file-count", "3",
                "--distribution", "random", "--camera", "static", "--run-for", "50",
            ]
        );
    }

    #[test]
    fn failed_run_has_no_measurement_dir() {
        let r = RunResult {
            suite: "s".to_string(),
            description: "d".to_string(),
            id: RunId::Failed,
            outcome: SuiteOutcome::RunFailed { reason: "x".to_string() },
            output_dir: Some(PathBuf::from("results/1")),
            shader_failures: Vec::new(),
        };
        assert!(r.measurement_dir().is_none());
    }
}
