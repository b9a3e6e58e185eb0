use crate::fingerprint::fingerprint_dir;
use crate::process::Executor;
use crate::shader::{self, CompileReport, ShaderCompilerSettings};
use crate::types::{Define, Fingerprint};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Reserved state file inside the shader directory.
pub const DEFAULT_STATE_FILE: &str = ".dirhash";

/// What one cache check did.
#[derive(Debug)]
pub enum CacheOutcome {
    Unchanged(Fingerprint),
    Compiled {
        forced: bool,
        /// Per-file failures do not block persisting the new fingerprint.
        report: CompileReport,
        fingerprint: Fingerprint,
    },
}

/// Last accepted fingerprint for one shader directory.
///
/// Single writer: two caches on the same directory at once is not supported.
pub struct ShaderCache<'a> {
    pub dir: &'a Path,
    pub state_file: &'a str,
    pub compiler: &'a ShaderCompilerSettings,
}

impl ShaderCache<'_> {
    fn state_path(&self) -> PathBuf {
        self.dir.join(self.state_file)
    }

    /// Missing, unreadable or malformed state reads as "never built".
    pub fn load_state(&self) -> Option<Fingerprint> {
        let s = fs::read_to_string(self.state_path()).ok()?;
        Fingerprint::parse(&s)
    }

    /// Write to a sibling temp file, then rename over the state file.
    pub fn save_state(&self, fp: &Fingerprint) -> Result<()> {
        let p = self.state_path();
        let tmp = self.dir.join(format!("{}.tmp", self.state_file));

        {
            let mut f =
                fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            f.write_all(fp.as_str().as_bytes())
                .with_context(|| format!("write {}", tmp.display()))?;
            f.sync_all().with_context(|| format!("sync {}", tmp.display()))?;
        }

        fs::rename(&tmp, &p).with_context(|| format!("replace {}", p.display()))?;
        Ok(())
    }

    /// Recompiles when the tree changed since the stored fingerprint or when forced.
    ///
    /// The post-compile fingerprint is stored even when some files failed, so an
    /// unchanged broken tree is not recompiled on every call.
    pub fn ensure_compiled(
        &self,
        exec: &dyn Executor,
        force: bool,
        defines: &[Define],
    ) -> Result<CacheOutcome> {
        let current = fingerprint_dir(self.dir, self.state_file)
            .with_context(|| format!("fingerprint {}", self.dir.display()))?;
        let stored = self.load_state();

        if !force && stored.as_ref() == Some(&current) {
            return Ok(CacheOutcome::Unchanged(current));
        }

        log::info!(
            "shader cache: stored={} current={} force={}",
            stored.as_ref().map(|f| f.as_str()).unwrap_or("<none>"),
            current,
            force
        );

        let report = shader::compile_dir(exec, self.compiler, self.dir, defines)?;

        // artifacts written by the compiler live in the tree too
        let fingerprint = fingerprint_dir(self.dir, self.state_file)
            .with_context(|| format!("fingerprint {}", self.dir.display()))?;

        if !report.is_clean() {
            log::warn!(
                "shader cache: {} of {} file(s) failed to compile",
                report.failed.len(),
                report.failed.len() + report.compiled.len()
            );
        }
        self.save_state(&fingerprint)?;

        Ok(CacheOutcome::Compiled {
            forced: force,
            report,
            fingerprint,
        })
    }
}
