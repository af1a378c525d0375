//! File staging: path allocation and guaranteed deletion.
//!
//! Two areas exist on disk: `temp` (uploads and per-attempt intermediates)
//! and `processed` (outputs served for download). They are the only mutable
//! state jobs share, and no locks guard them: every path handed out carries
//! either a random token or the owning job's id, so two jobs never meet on
//! the same file name.
//!
//! Deletion is best-effort. A failed delete is logged and swallowed; it must
//! never replace the job's real error.

use crate::error::PipelineError;
use crate::job::{FileReference, FileRole, JobId};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Allocator and janitor for the two staging areas.
#[derive(Debug, Clone)]
pub struct FileStaging {
    temp_dir: PathBuf,
    processed_dir: PathBuf,
}

impl FileStaging {
    /// Create the staging areas (idempotent) and return the allocator.
    pub fn ensure(temp_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let staging = Self {
            temp_dir: temp_dir.into(),
            processed_dir: processed_dir.into(),
        };
        for dir in [&staging.temp_dir, &staging.processed_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        debug!(
            "Staging ready: temp={}, processed={}",
            staging.temp_dir.display(),
            staging.processed_dir.display()
        );
        Ok(staging)
    }

    pub fn dir(&self, role: FileRole) -> &Path {
        match role {
            FileRole::Input => &self.temp_dir,
            FileRole::Output => &self.processed_dir,
        }
    }

    /// Allocate a fresh path in `role`'s area.
    ///
    /// The file name is `<token>_<suggested>`, where the token is a random
    /// v4 UUID, so concurrent allocations cannot collide.
    pub fn allocate(&self, role: FileRole, suggested_name: &str) -> FileReference {
        let token = Uuid::new_v4().simple().to_string();
        let name = format!("{}_{}", token, sanitise(suggested_name));
        FileReference::new(self.dir(role).join(name), role)
    }

    /// Allocate a job-scoped output path: `<stem>_<job id>.<ext>`.
    ///
    /// Deterministic per job, so a retried attempt overwrites the file left
    /// by the attempt before it instead of producing a second one.
    pub fn output_for(&self, job: &JobId, stem: &str, extension: &str) -> FileReference {
        let name = format!("{}_{}.{}", sanitise(stem), job, extension.trim_start_matches('.'));
        FileReference::new(self.processed_dir.join(name), FileRole::Output)
    }

    /// Copy a caller-provided file into the temp area as a job input.
    pub async fn stage_input(&self, source: &Path) -> Result<FileReference, PipelineError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mut staged = self.allocate(FileRole::Input, &name);
        tokio::fs::copy(source, &staged.path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PipelineError::InputMissing {
                    path: source.to_path_buf(),
                },
                _ => PipelineError::io(source, e),
            })?;
        staged.refresh_size()?;
        Ok(staged)
    }

    /// Stage every file in `sources`, in order. All or nothing: if one copy
    /// fails, the files staged before it are released.
    pub async fn stage_inputs<P: AsRef<Path>>(
        &self,
        sources: &[P],
    ) -> Result<Vec<FileReference>, PipelineError> {
        let mut staged = Vec::with_capacity(sources.len());
        for source in sources {
            match self.stage_input(source.as_ref()).await {
                Ok(file) => staged.push(file),
                Err(e) => {
                    warn!(
                        "Staging {} failed, releasing {} staged file(s)",
                        source.as_ref().display(),
                        staged.len()
                    );
                    self.release_all(&staged).await;
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    /// Delete the file behind `file`, if present. Never fails.
    pub async fn release(&self, file: &FileReference) {
        release_path(&file.path).await;
    }

    /// Release every reference in `files`.
    pub async fn release_all<'a>(&self, files: impl IntoIterator<Item = &'a FileReference>) {
        for f in files {
            self.release(f).await;
        }
    }
}

/// Delete `path` if present, logging anything other than "already gone".
pub async fn release_path(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Released {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to delete {}: {}", path.display(), e),
    }
}

/// Keep a suggested name to a single safe path component.
fn sanitise(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
