use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::TransferError;
use crate::validation::validate_file_name;

/// A finished download delivered to the user's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Turns a download's ordered chunks into one artifact.
///
/// Called from a blocking thread; implementations may do synchronous I/O.
pub trait Finalizer: Send + Sync {
    fn concatenate(&self, chunks: &[Bytes], file_name: &str) -> Result<Artifact, TransferError>;
}

/// Writes finished downloads into a directory.
///
/// - Rejects file names that are not a single path component.
/// - Writes to a hidden `.part` file first and renames it into place.
/// - Never overwrites: `name.ext` becomes `name (1).ext`, `name (2).ext`, ...
pub struct DirectoryFinalizer {
    dir: PathBuf,
}

impl DirectoryFinalizer {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Returns the download directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_part(&self, part: &Path, chunks: &[Bytes]) -> Result<u64, TransferError> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(part)?);
        let mut size = 0u64;
        for chunk in chunks {
            file.write_all(chunk)?;
            size += chunk.len() as u64;
        }
        file.into_inner()
            .map_err(|e| TransferError::Io(e.into_error()))?
            .sync_all()?;
        Ok(size)
    }
}

impl Finalizer for DirectoryFinalizer {
    fn concatenate(&self, chunks: &[Bytes], file_name: &str) -> Result<Artifact, TransferError> {
        let file_name = validate_file_name(file_name)?;
        std::fs::create_dir_all(&self.dir)?;

        let part = self.dir.join(format!(".{file_name}.part"));
        let size = match self.write_part(&part, chunks) {
            Ok(size) => size,
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                return Err(e);
            }
        };

        let path = unique_target(&self.dir, file_name);
        if let Err(e) = std::fs::rename(&part, &path) {
            let _ = std::fs::remove_file(&part);
            return Err(e.into());
        }

        debug!(path = %path.display(), size, "download written");
        Ok(Artifact { path, size })
    }
}

/// First path in `dir` for `file_name` that does not exist yet.
fn unique_target(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = name.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
