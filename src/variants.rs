use crate::config::CustomExperiment;
use crate::types::{BenchmarkSuite, BuildConfiguration, FlagValue, Scenario, Toggle};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeSet;

pub const OPTIMIZATION_ABLATION: &str = "optimization-ablation";
pub const MESH_CLUSTER_SWEEP: &str = "mesh-cluster-sweep";
pub const TRIANGLE_SCALING: &str = "triangle-scaling";
pub const CULLING_MODE: &str = "cpu-vs-gpu-culling";

pub const BUILTIN: &[(&str, &str)] = &[
    (OPTIMIZATION_ABLATION, "each optimisation disabled in turn, then all of them"),
    (MESH_CLUSTER_SWEEP, "meshlet vertex/primitive limits"),
    (TRIANGLE_SCALING, "same build, growing scene"),
    (CULLING_MODE, "single-threaded CPU culling against GPU culling"),
];

const OPTIMIZATIONS: &[(&str, &str)] = &[
    ("LOD_ENABLED", "no LOD"),
    ("CONE_CULLING_ENABLED", "no cone culling"),
];
const MESHLET_VERTS: &[u32] = &[32, 64, 128];
const MESHLET_PRIMS: &[u32] = &[64, 124];
const SCENE_COPIES: &[u32] = &[1, 2, 4, 8, 16];
const CPU_CULL: &str = "CPU_CULL_ST";

/// Starting point every suite is derived from.
#[derive(Clone, Debug)]
pub struct Baseline {
    pub build: BuildConfiguration,
    pub shader_keys: Vec<String>,
    pub scenario: Scenario,
}

impl Baseline {
    /// Baseline build with `toggles` applied and nothing else touched.
    pub fn suite(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        toggles: &[Toggle],
        scenario: Option<Scenario>,
    ) -> BenchmarkSuite {
        let mut build = self.build.clone();
        build.apply(&Toggle::new("BENCHMARK_MODE", FlagValue::ON));
        for t in toggles {
            build.apply(t);
        }

        BenchmarkSuite {
            name: name.into(),
            description: description.into(),
            shader_defines: build.select(&self.shader_keys),
            build,
            scenario: scenario.unwrap_or_else(|| self.scenario.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Experiment {
    pub name: String,
    pub description: String,
    pub suites: Vec<BenchmarkSuite>,
}

/// Custom experiments may not reuse a built-in name or each other's.
pub fn check_custom(custom: &[CustomExperiment]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for c in custom {
        if BUILTIN.iter().any(|(n, _)| *n == c.name) {
            bail!("custom experiment '{}' clashes with a built-in experiment", c.name);
        }
        if !seen.insert(c.name.as_str()) {
            bail!("custom experiment '{}' is declared twice", c.name);
        }
    }
    Ok(())
}

/// Names of built-in experiments followed by custom ones.
pub fn experiment_names(custom: &[CustomExperiment]) -> Vec<String> {
    BUILTIN
        .iter()
        .map(|(n, _)| n.to_string())
        .chain(custom.iter().map(|c| c.name.clone()))
        .collect()
}

pub fn generate(
    name: &str,
    baseline: &Baseline,
    custom: &[CustomExperiment],
) -> Result<Experiment> {
    let suites = match name {
        OPTIMIZATION_ABLATION => optimization_ablation(baseline),
        MESH_CLUSTER_SWEEP => mesh_cluster_sweep(baseline),
        TRIANGLE_SCALING => triangle_scaling(baseline),
        CULLING_MODE => culling_mode(baseline),
        other => {
            let c = custom.iter().find(|c| c.name == other).ok_or_else(|| {
                anyhow!(
                    "unknown experiment '{}' (known: {})",
                    other,
                    experiment_names(custom).join(", ")
                )
            })?;
            let suites = c
                .suites
                .iter()
                .map(|s| baseline.suite(&s.name, &s.description, &s.toggles, s.scenario.clone()))
                .collect();
            return finish(&c.name, &c.description, suites);
        }
    };

    let description = BUILTIN
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
        .unwrap_or_default();
    finish(name, description, suites)
}

fn finish(name: &str, description: &str, suites: Vec<BenchmarkSuite>) -> Result<Experiment> {
    let mut seen = BTreeSet::new();
    for s in &suites {
        if !seen.insert(s.name.as_str()) {
            bail!("experiment '{}' declares suite '{}' twice", name, s.name);
        }
    }
    if suites.is_empty() {
        bail!("experiment '{}' has no suites", name);
    }

    Ok(Experiment {
        name: name.to_string(),
        description: description.to_string(),
        suites,
    })
}

fn optimization_ablation(b: &Baseline) -> Vec<BenchmarkSuite> {
    let all_on: Vec<Toggle> = OPTIMIZATIONS
        .iter()
        .map(|(k, _)| Toggle::new(*k, FlagValue::ON))
        .collect();
    let all_off: Vec<Toggle> = OPTIMIZATIONS
        .iter()
        .map(|(k, _)| Toggle::new(*k, FlagValue::OFF))
        .collect();

    let mut out = vec![b.suite("all-on", "All optimisations", &all_on, None)];
    for (key, label) in OPTIMIZATIONS {
        let name = format!("no-{}", key.to_ascii_lowercase().replace('_', "-"));
        out.push(b.suite(name, *label, &[Toggle::new(*key, FlagValue::OFF)], None));
    }
    out.push(b.suite("all-off", "No optimisations", &all_off, None));
    out
}

fn mesh_cluster_sweep(b: &Baseline) -> Vec<BenchmarkSuite> {
    let mut out = Vec::new();
    for &v in MESHLET_VERTS {
        for &p in MESHLET_PRIMS {
            out.push(b.suite(
                format!("meshlet-v{v}-p{p}"),
                format!("{v} verts / {p} prims"),
                &[
                    Toggle::new("MESHLET_MAX_VERTS", FlagValue::Level(v)),
                    Toggle::new("MESHLET_MAX_PRIMS", FlagValue::Level(p)),
                ],
                None,
            ));
        }
    }
    out
}

fn triangle_scaling(b: &Baseline) -> Vec<BenchmarkSuite> {
    let per_copy = b.scenario.files.len().max(1) as u32;
    SCENE_COPIES
        .iter()
        .map(|&n| {
            let scenario = Scenario {
                file_count: Some(per_copy * n),
                ..b.scenario.clone()
            };
            b.suite(format!("scene-x{n}"), format!("{n}x scene"), &[], Some(scenario))
        })
        .collect()
}

fn culling_mode(b: &Baseline) -> Vec<BenchmarkSuite> {
    vec![
        b.suite("gpu-cull", "GPU culling", &[Toggle::new(CPU_CULL, FlagValue::OFF)], None),
        b.suite("cpu-cull-st", "CPU culling (ST)", &[Toggle::new(CPU_CULL, FlagValue::ON)], None),
    ]
}
