//! Capability interfaces for the heavyweight external tools.
//!
//! Operations never spawn a process themselves. They hold a [`Toolchain`]
//! and call through three traits:
//!
//! | trait | job | default implementation |
//! |---|---|---|
//! | [`Renderer`] | HTML → PDF | [`Wkhtmltopdf`] |
//! | [`Compressor`] | PDF → smaller PDF at a quality factor | [`Ghostscript`] |
//! | [`DocumentConverter`] | office formats ↔ PDF | [`LibreOffice`] |
//!
//! Tests and embedders swap any of them for an in-process fake.

mod ghostscript;
mod libreoffice;
mod wkhtmltopdf;

pub use ghostscript::Ghostscript;
pub use libreoffice::LibreOffice;
pub use wkhtmltopdf::Wkhtmltopdf;

use crate::compress::QualityFactor;
use crate::config::ToolPaths;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Renders an HTML document to a PDF file.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render_html(&self, html: &str, output: &Path) -> Result<(), PipelineError>;
}

/// Rewrites a PDF at a given quality factor. Each call overwrites `output`.
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        quality: QualityFactor,
    ) -> Result<(), PipelineError>;
}

/// Target formats of the office-document conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Pptx,
}

impl DocumentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Xlsx => "xlsx",
            DocumentFormat::Pptx => "pptx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Converts an office document to another document format.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        target: DocumentFormat,
    ) -> Result<(), PipelineError>;
}

/// The set of external capabilities handed to every operation.
#[derive(Clone)]
pub struct Toolchain {
    pub renderer: Arc<dyn Renderer>,
    pub compressor: Arc<dyn Compressor>,
    pub converter: Arc<dyn DocumentConverter>,
}

impl Toolchain {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        compressor: Arc<dyn Compressor>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        Self {
            renderer,
            compressor,
            converter,
        }
    }

    /// Process-backed toolchain using the configured binaries.
    pub fn from_paths(paths: &ToolPaths) -> Self {
        Self::new(
            Arc::new(Wkhtmltopdf::new(&paths.wkhtmltopdf)),
            Arc::new(Ghostscript::new(&paths.ghostscript)),
            Arc::new(LibreOffice::new(&paths.soffice)),
        )
    }
}

/// Run `cmd` to completion, turning spawn failures and non-zero exits into
/// [`PipelineError::ExternalTool`] carrying the tool's stderr.
pub(crate) async fn run_tool(tool: &str, mut cmd: Command) -> Result<(), PipelineError> {
    debug!("Running {tool}: {:?}", cmd.as_std());
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::tool(tool, format!("could not start: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = match stderr.trim() {
        "" => format!("exited with {}", output.status),
        msg => format!("exited with {}: {}", output.status, msg),
    };
    Err(PipelineError::tool(tool, detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_format_extensions() {
        assert_eq!(DocumentFormat::Pdf.extension(), "pdf");
        assert_eq!(DocumentFormat::Pptx.to_string(), "pptx");
    }

    #[tokio::test]
    async fn missing_binary_is_a_tool_error() {
        let cmd = Command::new("/definitely/not/a/real/binary");
        let err = run_tool("fake", cmd).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("could not start"), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo broken pipe >&2; exit 3");
        let err = run_tool("sh", cmd).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("broken pipe"), "got: {msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_ok() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 0");
        run_tool("sh", cmd).await.unwrap();
    }
}
