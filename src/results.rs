use crate::hw::HostInfo;
use crate::types::RunResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "session.json";

/// Columns the application writes per sampled frame.
pub const FRAME_COLUMNS: &[&str] = &[
    "cull",
    "frameMainCPU",
    "frameRenderCPU",
    "frameGPU",
    "frame",
    "triangles",
];

/// Everything the reporting side needs from one orchestration session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionManifest {
    pub experiment: String,
    pub started_at: String,
    pub finished_at: String,
    pub host: HostInfo,
    /// Suite declaration order.
    pub results: Vec<RunResult>,
}

pub fn manifest_path(results_dir: &Path) -> PathBuf {
    results_dir.join(MANIFEST_FILE)
}

pub fn load_manifest(path: &Path) -> Result<SessionManifest> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
}

pub fn save_manifest(results_dir: &Path, manifest: &SessionManifest) -> Result<PathBuf> {
    std::fs::create_dir_all(results_dir)
        .with_context(|| format!("create {}", results_dir.display()))?;
    let p = manifest_path(results_dir);
    let s = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(p)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnStats {
    pub samples: usize,
    pub mean: f64,
    pub max: f64,
}

/// Per-column stats over every measurement file of one run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub files: Vec<PathBuf>,
    pub rows: usize,
    pub columns: BTreeMap<String, ColumnStats>,
}

/// Reads every `*.csv` in `dir`. Non-positive cells count as "not sampled".
pub fn summarize_dir(dir: &Path) -> Result<RunSummary> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read_dir {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut sums: BTreeMap<String, (usize, f64, f64)> = BTreeMap::new();
    let mut rows = 0usize;

    for f in &files {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(f)
            .with_context(|| format!("open {}", f.display()))?;
        let headers = rdr
            .headers()
            .with_context(|| format!("header of {}", f.display()))?
            .clone();

        for record in rdr.records() {
            let record = record.with_context(|| format!("row of {}", f.display()))?;
            rows += 1;
            for (name, cell) in headers.iter().zip(record.iter()) {
                let Ok(v) = cell.parse::<f64>() else {
                    continue;
                };
                if v <= 0.0 || !v.is_finite() {
                    continue;
                }
                let e = sums.entry(name.to_string()).or_insert((0, 0.0, f64::MIN));
                e.0 += 1;
                e.1 += v;
                e.2 = e.2.max(v);
            }
        }
    }

    let columns = sums
        .into_iter()
        .map(|(name, (n, sum, max))| {
            (
                name,
                ColumnStats {
                    samples: n,
                    mean: sum / n as f64,
                    max,
                },
            )
        })
        .collect();

    Ok(RunSummary { files, rows, columns })
}

/// Summaries for the runs that have measurements, in result order.
/// Failed runs are skipped without touching the filesystem.
pub fn summarize_results(results: &[RunResult]) -> Vec<(&RunResult, Result<RunSummary>)> {
    results
        .iter()
        .filter_map(|r| r.measurement_dir().map(|dir| (r, summarize_dir(dir))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunId, SuiteOutcome};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn summary_ignores_unsampled_cells() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("main.csv"),
            "cull, frameMainCPU, frameGPU, triangles\n\
             -1, 2.0, 4.0, 1000\n\
             0.5, 4.0, -1, 3000\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a table").unwrap();

        let s = summarize_dir(dir.path()).unwrap();
        assert_eq!(s.files.len(), 1);
        assert_eq!(s.rows, 2);
        assert_eq!(s.columns["cull"], ColumnStats { samples: 1, mean: 0.5, max: 0.5 });
        assert_eq!(s.columns["frameMainCPU"].mean, 3.0);
        assert_eq!(s.columns["frameGPU"].samples, 1);
        assert_eq!(s.columns["triangles"].max, 3000.0);
    }

    #[test]
    fn failed_runs_are_never_opened() {
        let results = vec![
            RunResult {
                suite: "a".to_string(),
                description: "A".to_string(),
                id: RunId::Failed,
                outcome: SuiteOutcome::BuildFailed { status: Some(1) },
                output_dir: Some(PathBuf::from("/definitely/missing")),
                shader_failures: Vec::new(),
            },
        ];
        assert!(summarize_results(&results).is_empty());
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let m = SessionManifest {
            experiment: "optimization-ablation".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:10:00Z".to_string(),
            host: HostInfo {
                logical_cpus: 8,
                total_ram_mb: 16384,
                os: None,
                cpu_brand: None,
            },
            results: vec![RunResult {
                suite: "all-on".to_string(),
                description: "All optimisations".to_string(),
                id: RunId::Assigned("12".to_string()),
                outcome: SuiteOutcome::Passed,
                output_dir: Some(dir.path().join("12")),
                shader_failures: vec![PathBuf::from("Shaders/broken.frag")],
            }],
        };

        let p = save_manifest(dir.path(), &m).unwrap();
        let back = load_manifest(&p).unwrap();
        assert_eq!(back.experiment, m.experiment);
        assert_eq!(back.results[0].id, RunId::Assigned("12".to_string()));
        assert!(back.results[0].outcome.is_passed());
        assert_eq!(back.results[0].shader_failures, [PathBuf::from("Shaders/broken.frag")]);
    }
}
