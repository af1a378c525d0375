use super::{run_tool, Renderer};
use crate::error::PipelineError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const TOOL: &str = "wkhtmltopdf";

/// HTML renderer backed by the `wkhtmltopdf` binary.
///
/// The HTML is staged in a system temporary file that is removed when
/// rendering returns, success or not.
#[derive(Debug, Clone)]
pub struct Wkhtmltopdf {
    binary: PathBuf,
}

impl Wkhtmltopdf {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    fn command(&self, html: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--load-error-handling", "ignore"])
            .arg("--enable-local-file-access")
            .arg("--quiet")
            .args(["--dpi", "300"])
            .args(["--image-quality", "100"])
            .arg(html)
            .arg(output);
        cmd
    }
}

#[async_trait]
impl Renderer for Wkhtmltopdf {
    async fn render_html(&self, html: &str, output: &Path) -> Result<(), PipelineError> {
        let page = {
            let html = html.to_owned();
            tokio::task::spawn_blocking(move || -> std::io::Result<tempfile::NamedTempFile> {
                let mut page = tempfile::Builder::new()
                    .prefix("docpipe_")
                    .suffix(".html")
                    .tempfile()?;
                page.write_all(html.as_bytes())?;
                page.flush()?;
                Ok(page)
            })
            .await
            .map_err(|e| PipelineError::Internal(format!("html staging task panicked: {e}")))?
            .map_err(|e| PipelineError::tool(TOOL, format!("could not stage HTML: {e}")))?
        };

        run_tool(TOOL, self.command(page.path(), output)).await
    }
}
