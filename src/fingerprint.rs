use crate::types::Fingerprint;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("directory not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("scan of {} failed: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Fingerprint of every regular file under `dir`, skipping files named `exclude`.
///
/// Each chunk is hashed on its own and the chunk digest (hex) is what feeds the
/// combined hasher. Files are visited in file-name order. Files that cannot be
/// opened and subdirectories that cannot be listed are skipped with a warning;
/// only a failure on `dir` itself is an error.
pub fn fingerprint_dir(dir: &Path, exclude: &str) -> Result<Fingerprint, FingerprintError> {
    if !dir.is_dir() {
        return Err(FingerprintError::NotFound(dir.to_path_buf()));
    }

    let mut combined = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK];

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 && e.io_error().is_some() => {
                log::warn!("skip {} ({})", e.path().unwrap_or(dir).display(), e);
                continue;
            }
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                return Err(FingerprintError::Scan {
                    path,
                    source: e.into(),
                });
            }
        };

        if !entry.file_type().is_file() || entry.file_name() == exclude {
            continue;
        }

        let path = entry.path();
        let mut f = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("skip {} (cannot open: {})", path.display(), e);
                continue;
            }
        };

        log::debug!("hashing {}", path.display());
        fold_file(&mut combined, &mut f, &mut buf).map_err(|source| FingerprintError::Scan {
            path: path.to_path_buf(),
            source,
        })?;
    }

    Ok(Fingerprint::from_hash(combined.finalize()))
}

fn fold_file(combined: &mut blake3::Hasher, f: &mut fs::File, buf: &mut [u8]) -> io::Result<()> {
    loop {
        let n = read_full(f, buf)?;
        if n == 0 {
            return Ok(());
        }
        let chunk_digest = blake3::hash(&buf[..n]);
        combined.update(chunk_digest.to_hex().as_bytes());
        if n < buf.len() {
            return Ok(());
        }
    }
}

/// Fills `buf` unless EOF comes first, so chunk boundaries only depend on content.
fn read_full(f: &mut fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
