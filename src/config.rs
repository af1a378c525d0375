//! Configuration for the job pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct holds every knob so the queue,
//! the runner and the operations all read the same values.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the docpipe job pipeline.
///
/// # Example
/// ```rust
/// use docpipe::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .media_root("/var/lib/docpipe")
///     .workers(4)
///     .max_retries(3)
///     .build()
///     .unwrap();
/// assert!(config.processed_dir.ends_with("processed"));
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root of the staging areas. Default: `./media`.
    pub media_root: PathBuf,

    /// Incoming uploads and per-attempt intermediates. Default: `<media_root>/temp`.
    pub temp_dir: PathBuf,

    /// Produced outputs served for download. Default: `<media_root>/processed`.
    pub processed_dir: PathBuf,

    /// Number of queue workers running jobs concurrently. Default: CPU count.
    pub workers: usize,

    /// Inner worker bound for homogeneous fan-out inside one job.
    /// Default: 2 × CPU count.
    ///
    /// Image decode/encode is memory hungry; the bound keeps a 200-image
    /// upload from decoding 200 images at once.
    pub fanout_workers: usize,

    /// Retries after the first failed attempt. Default: 3.
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds. Default: 5000.
    pub retry_delay_ms: u64,

    /// How long a finished job's result stays pollable, in seconds. Default: 300.
    pub result_ttl_secs: u64,

    /// How long a caller blocks waiting for a result, in seconds. Default: 300.
    pub result_timeout_secs: u64,

    /// Delay between narration chunks in milliseconds. Default: 100.
    pub stream_pace_ms: u64,

    /// Words per narration chunk. Default: 5.
    pub stream_words_per_chunk: usize,

    /// Upper bound on inputs per submission. Default: 1000.
    pub max_input_files: usize,

    /// URL prefix used in output descriptors. Default: `/api/download/`.
    pub download_prefix: String,

    /// Target size used when a compression request omits one. Default: `"1MB"`.
    pub default_target_size: String,

    /// Locations of the external conversion tools.
    pub tools: ToolPaths,

    /// Optional observer for job lifecycle events.
    pub progress_callback: Option<ProgressCallback>,
}

/// Paths (or bare command names resolved through `PATH`) of external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    /// HTML-to-PDF renderer. Default: `wkhtmltopdf`.
    pub wkhtmltopdf: PathBuf,
    /// PDF compressor. Default: `gs`.
    pub ghostscript: PathBuf,
    /// Office suite used for document conversions. Default: `soffice`.
    pub soffice: PathBuf,
    /// Explicit pdfium shared library. `None` binds the system copy.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            wkhtmltopdf: PathBuf::from("wkhtmltopdf"),
            ghostscript: PathBuf::from("gs"),
            soffice: PathBuf::from("soffice"),
            pdfium_library: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let media_root = PathBuf::from("media");
        Self {
            temp_dir: media_root.join("temp"),
            processed_dir: media_root.join("processed"),
            media_root,
            workers: cpu_count(),
            fanout_workers: cpu_count() * 2,
            max_retries: 3,
            retry_delay_ms: 5000,
            result_ttl_secs: 300,
            result_timeout_secs: 300,
            stream_pace_ms: 100,
            stream_words_per_chunk: 5,
            max_input_files: 1000,
            download_prefix: "/api/download/".to_string(),
            default_target_size: "1MB".to_string(),
            tools: ToolPaths::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("media_root", &self.media_root)
            .field("temp_dir", &self.temp_dir)
            .field("processed_dir", &self.processed_dir)
            .field("workers", &self.workers)
            .field("fanout_workers", &self.fanout_workers)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("result_ttl_secs", &self.result_ttl_secs)
            .field("result_timeout_secs", &self.result_timeout_secs)
            .field("tools", &self.tools)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
            temp_dir_set: false,
            processed_dir_set: false,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }

    pub fn stream_pace(&self) -> Duration {
        Duration::from_millis(self.stream_pace_ms)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    temp_dir_set: bool,
    processed_dir_set: bool,
}

impl PipelineConfigBuilder {
    /// Set the media root. Staging areas follow it unless set explicitly.
    pub fn media_root(mut self, root: impl AsRef<Path>) -> Self {
        self.config.media_root = root.as_ref().to_path_buf();
        self
    }

    pub fn temp_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.temp_dir = dir.as_ref().to_path_buf();
        self.temp_dir_set = true;
        self
    }

    pub fn processed_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.processed_dir = dir.as_ref().to_path_buf();
        self.processed_dir_set = true;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn fanout_workers(mut self, n: usize) -> Self {
        self.config.fanout_workers = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn result_ttl_secs(mut self, secs: u64) -> Self {
        self.config.result_ttl_secs = secs;
        self
    }

    pub fn result_timeout_secs(mut self, secs: u64) -> Self {
        self.config.result_timeout_secs = secs;
        self
    }

    pub fn stream_pace_ms(mut self, ms: u64) -> Self {
        self.config.stream_pace_ms = ms;
        self
    }

    pub fn stream_words_per_chunk(mut self, n: usize) -> Self {
        self.config.stream_words_per_chunk = n.max(1);
        self
    }

    pub fn max_input_files(mut self, n: usize) -> Self {
        self.config.max_input_files = n;
        self
    }

    pub fn download_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.download_prefix = prefix.into();
        self
    }

    pub fn default_target_size(mut self, size: impl Into<String>) -> Self {
        self.config.default_target_size = size.into();
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PipelineConfig, PipelineError> {
        if !self.temp_dir_set {
            self.config.temp_dir = self.config.media_root.join("temp");
        }
        if !self.processed_dir_set {
            self.config.processed_dir = self.config.media_root.join("processed");
        }

        let c = &self.config;
        if c.temp_dir == c.processed_dir {
            return Err(PipelineError::InvalidConfig(format!(
                "temp and processed areas must differ, both are {}",
                c.temp_dir.display()
            )));
        }
        if c.max_input_files == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_input_files must be ≥ 1".into(),
            ));
        }
        if crate::params::parse_size_to_bytes(&c.default_target_size).is_none() {
            return Err(PipelineError::InvalidConfig(format!(
                "default target size '{}' is not of the form <n>kb or <n>mb",
                c.default_target_size
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_source_system() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_delay(), Duration::from_secs(5));
        assert_eq!(c.result_ttl(), Duration::from_secs(300));
        assert_eq!(c.result_timeout(), Duration::from_secs(300));
        assert_eq!(c.default_target_size, "1MB");
        assert_eq!(c.fanout_workers, c.workers * 2);
    }

    #[test]
    fn staging_dirs_follow_media_root() {
        let c = PipelineConfig::builder()
            .media_root("/srv/media")
            .build()
            .unwrap();
        assert_eq!(c.temp_dir, PathBuf::from("/srv/media/temp"));
        assert_eq!(c.processed_dir, PathBuf::from("/srv/media/processed"));
    }

    #[test]
    fn explicit_dirs_win_over_media_root() {
        let c = PipelineConfig::builder()
            .temp_dir("/scratch")
            .media_root("/srv/media")
            .build()
            .unwrap();
        assert_eq!(c.temp_dir, PathBuf::from("/scratch"));
        assert_eq!(c.processed_dir, PathBuf::from("/srv/media/processed"));
    }

    #[test]
    fn rejects_shared_staging_dir() {
        let err = PipelineConfig::builder()
            .temp_dir("/same")
            .processed_dir("/same")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_bad_default_size() {
        assert!(PipelineConfig::builder()
            .default_target_size("huge")
            .build()
            .is_err());
    }

    #[test]
    fn worker_counts_are_clamped() {
        let c = PipelineConfig::builder()
            .workers(0)
            .fanout_workers(0)
            .build()
            .unwrap();
        assert_eq!(c.workers, 1);
        assert_eq!(c.fanout_workers, 1);
    }
}
