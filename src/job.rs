//! Job data model: jobs, staged file references, parameters and payloads.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ── Identity ─────────────────────────────────────────────────────────────

/// Opaque, collision-resistant job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Status ───────────────────────────────────────────────────────────────

/// Lifecycle status. `Pending` is the only initial state; `Succeeded` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    fn can_move_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCESS",
            JobStatus::Failed => "FAILURE",
        };
        f.write_str(s)
    }
}

// ── Files ────────────────────────────────────────────────────────────────

/// Which staging area a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileRole {
    /// Uploaded or intermediate file in the temp area; owned by the job and
    /// deleted once no longer needed.
    Input,
    /// Produced file in the processed area.
    Output,
}

/// A staged file plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub path: PathBuf,
    pub role: FileRole,
    pub size: u64,
    pub media_type: String,
}

impl FileReference {
    /// Describe a file without touching the filesystem. Size starts at 0.
    pub fn new(path: impl Into<PathBuf>, role: FileRole) -> Self {
        let path = path.into();
        let media_type = media_type_for(&path).to_string();
        Self {
            path,
            role,
            size: 0,
            media_type,
        }
    }

    /// Describe an existing file, reading its size.
    pub fn stat(path: impl Into<PathBuf>, role: FileRole) -> Result<Self, PipelineError> {
        let mut r = Self::new(path, role);
        r.refresh_size()?;
        Ok(r)
    }

    /// Re-read the byte size from disk.
    pub fn refresh_size(&mut self) -> Result<u64, PipelineError> {
        let meta = std::fs::metadata(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::InputMissing {
                path: self.path.clone(),
            },
            _ => PipelineError::io(&self.path, e),
        })?;
        self.size = meta.len();
        Ok(self.size)
    }

    /// Lower-cased extension without the dot, or `""`.
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }

    /// File name component as a string.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lower-cased extension of a path without the dot.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Media type guessed from the extension.
pub fn media_type_for(path: &Path) -> &'static str {
    match extension_of(path).as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

// ── Parameters ───────────────────────────────────────────────────────────

/// Named string parameters of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set `key` to `default` unless already present.
    pub fn default_to(&mut self, key: &str, default: &str) {
        self.0
            .entry(key.to_string())
            .or_insert_with(|| default.to_string());
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).map(crate::params::parse_flag).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ── Payloads ─────────────────────────────────────────────────────────────

/// Client-facing description of one produced output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub media_type: String,
    pub previewable: bool,
}

impl OutputDescriptor {
    pub fn from_reference(file: &FileReference, download_prefix: &str) -> Self {
        let name = file.file_name();
        let previewable = matches!(file.extension().as_str(), "pdf" | "jpg" | "jpeg" | "png");
        Self {
            url: format!("{download_prefix}{name}"),
            name,
            size: file.size,
            media_type: file.media_type.clone(),
            previewable,
        }
    }
}

/// Structured failure result of a pair operation: both sides always null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFallback {
    pub first_output: Option<OutputDescriptor>,
    pub second_output: Option<OutputDescriptor>,
    pub first_size: u64,
    pub second_size: u64,
    pub error: String,
}

impl PairFallback {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            first_output: None,
            second_output: None,
            first_size: 0,
            second_size: 0,
            error: error.into(),
        }
    }
}

/// What a job reports once it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobPayload {
    Files { files: Vec<OutputDescriptor> },
    Pair(PairFallback),
    Error { error: String },
}

impl JobPayload {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobPayload::Files { .. } => None,
            JobPayload::Pair(p) => Some(&p.error),
            JobPayload::Error { error } => Some(error),
        }
    }

    pub fn files(&self) -> &[OutputDescriptor] {
        match self {
            JobPayload::Files { files } => files,
            _ => &[],
        }
    }
}

// ── Job ──────────────────────────────────────────────────────────────────

/// One submitted conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Canonical operation name (aliases resolved).
    pub operation: String,
    pub inputs: Vec<FileReference>,
    pub params: Params,
    pub status: JobStatus,
    /// Retries performed so far; the first attempt is not a retry.
    pub retry_count: u32,
    pub result: Option<JobPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(operation: impl Into<String>, inputs: Vec<FileReference>, params: Params) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            operation: operation.into(),
            inputs,
            params,
            status: JobStatus::Pending,
            retry_count: 0,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing any regression out of a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), PipelineError> {
        if !self.status.can_move_to(next) {
            return Err(PipelineError::Internal(format!(
                "job {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the terminal outcome.
    pub fn finish(&mut self, status: JobStatus, payload: JobPayload) -> Result<(), PipelineError> {
        if !status.is_terminal() {
            return Err(PipelineError::Internal(format!(
                "{status:?} is not a terminal status"
            )));
        }
        self.transition(status)?;
        self.result = Some(payload);
        Ok(())
    }

    /// Inputs the job owns and must delete.
    pub fn owned_inputs(&self) -> impl Iterator<Item = &FileReference> {
        self.inputs.iter().filter(|f| f.role == FileRole::Input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("images_to_pdf", vec![], Params::default())
    }

    #[test]
    fn new_job_is_pending() {
        let j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.retry_count, 0);
        assert!(j.result.is_none());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let mut j = job();
        j.transition(JobStatus::Running).unwrap();
        j.transition(JobStatus::Running).unwrap();
        j.finish(JobStatus::Succeeded, JobPayload::Files { files: vec![] })
            .unwrap();
        assert!(j.transition(JobStatus::Running).is_err());
        assert!(j.transition(JobStatus::Failed).is_err());
        assert!(j.transition(JobStatus::Pending).is_err());
        assert_eq!(j.status, JobStatus::Succeeded);
    }

    #[test]
    fn finish_requires_terminal_status() {
        let mut j = job();
        j.transition(JobStatus::Running).unwrap();
        assert!(j
            .finish(JobStatus::Running, JobPayload::Error { error: "x".into() })
            .is_err());
    }

    #[test]
    fn only_input_role_is_owned() {
        let mut j = job();
        j.inputs = vec![
            FileReference::new("/tmp/a.pdf", FileRole::Input),
            FileReference::new("/srv/processed/last.pdf", FileRole::Output),
        ];
        let owned: Vec<_> = j.owned_inputs().collect();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].path, PathBuf::from("/tmp/a.pdf"));
    }

    #[test]
    fn output_descriptor_fields() {
        let mut f = FileReference::new("/srv/processed/compressed_1.pdf", FileRole::Output);
        f.size = 2048;
        let d = OutputDescriptor::from_reference(&f, "/api/download/");
        assert_eq!(d.name, "compressed_1.pdf");
        assert_eq!(d.url, "/api/download/compressed_1.pdf");
        assert_eq!(d.media_type, "application/pdf");
        assert!(d.previewable);

        let docx = FileReference::new("/p/pdf_to_word_1.docx", FileRole::Output);
        assert!(!OutputDescriptor::from_reference(&docx, "/").previewable);
    }

    #[test]
    fn pair_fallback_serialises_nulls() {
        let payload = JobPayload::Pair(PairFallback::new("boom"));
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["first_output"].is_null());
        assert!(json["second_output"].is_null());
        assert_eq!(json["first_size"], 0);
        assert_eq!(json["second_size"], 0);
        assert_eq!(json["error"], "boom");
        assert_eq!(payload.error_message(), Some("boom"));
    }

    #[test]
    fn params_defaults_do_not_override() {
        let mut p: Params = [("size", "500kb")].into_iter().collect();
        p.default_to("size", "1MB");
        p.default_to("use_last", "false");
        assert_eq!(p.get("size"), Some("500kb"));
        assert!(!p.flag("use_last"));
    }
}
