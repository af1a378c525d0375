//! Size-targeting compression.
//!
//! Re-run an external compression pass at decreasing quality until the
//! output fits a byte budget or the quality floor is reached:
//!
//! ```text
//! q = 0.9 → compress → size ≤ target? ─yes→ done
//!                          │ no
//!                  q ≤ 0.1? ─yes→ done (best effort, warn)
//!                          │ no
//!                     q -= 0.1, repeat
//! ```
//!
//! Every attempt overwrites the same output, so a retried job can restart the
//! search from the top. The search space is at most nine steps; no smarter
//! search is attempted.

use crate::error::PipelineError;
use crate::tools::Compressor;
use crate::verify::sync_file;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Lossy-compression aggressiveness, held as integer tenths so the loop
/// steps exactly: 0.9, 0.8, ... 0.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QualityFactor(u8);

impl QualityFactor {
    /// Where every search starts.
    pub const START: QualityFactor = QualityFactor(9);
    /// The lowest quality ever tried.
    pub const FLOOR: QualityFactor = QualityFactor(1);

    /// Quality from tenths, clamped into `FLOOR..=10`.
    pub fn from_tenths(tenths: u8) -> Self {
        Self(tenths.clamp(Self::FLOOR.0, 10))
    }

    pub fn as_f32(&self) -> f32 {
        f32::from(self.0) / 10.0
    }

    /// Quality as a 0..=100 percentage.
    pub fn percent(&self) -> u32 {
        u32::from(self.0) * 10
    }

    pub fn is_floor(&self) -> bool {
        *self <= Self::FLOOR
    }

    /// The next lower step, or `None` at the floor.
    pub fn step_down(&self) -> Option<Self> {
        (!self.is_floor()).then(|| Self(self.0 - 1))
    }
}

impl fmt::Display for QualityFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.as_f32())
    }
}

/// One pass of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionAttempt {
    pub quality: QualityFactor,
    pub size: u64,
}

/// Outcome of [`compress_to_size`].
#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub path: PathBuf,
    /// Every attempt in the order made.
    pub attempts: Vec<CompressionAttempt>,
    /// `false` when the floor was reached with the output still too large.
    pub reached_target: bool,
}

impl CompressionReport {
    /// Size of the final output.
    pub fn final_size(&self) -> u64 {
        self.attempts.last().map(|a| a.size).unwrap_or(0)
    }
}

/// Compress `input` into `output` until it is at most `target_bytes`.
///
/// Being unable to hit the target is not an error: the floor-quality result
/// is kept. A zero-byte final output is, since it means the tool failed
/// without saying so.
pub async fn compress_to_size(
    compressor: &dyn Compressor,
    input: &Path,
    output: &Path,
    target_bytes: u64,
) -> Result<CompressionReport, PipelineError> {
    let mut quality = QualityFactor::START;
    let mut attempts = Vec::new();

    let reached_target = loop {
        compressor.compress(input, output, quality).await?;

        let size = file_size(output).await?;
        attempts.push(CompressionAttempt { quality, size });
        info!(
            "Compressed size: {} bytes at quality {}, target: {} bytes",
            size, quality, target_bytes
        );

        if size <= target_bytes {
            break true;
        }
        match quality.step_down() {
            Some(next) => quality = next,
            None => break false,
        }
    };

    if !reached_target {
        warn!(
            "Quality floor reached for {}: {} bytes still above target {}",
            output.display(),
            attempts.last().map(|a| a.size).unwrap_or(0),
            target_bytes
        );
    }

    sync_file(output)
        .await
        .map_err(|e| PipelineError::io(output, e))?;
    if file_size(output).await? == 0 {
        return Err(PipelineError::tool(
            "compressor",
            format!("compressed output {} is empty", output.display()),
        ));
    }

    Ok(CompressionReport {
        path: output.to_path_buf(),
        attempts,
        reached_target,
    })
}

async fn file_size(path: &Path) -> Result<u64, PipelineError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PipelineError::tool(
            "compressor",
            format!("no output written at {}", path.display()),
        )),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}
