use super::{run_tool, DocumentConverter, DocumentFormat};
use crate::error::PipelineError;
use crate::job::extension_of;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

const TOOL: &str = "libreoffice";

/// Office conversions through a headless LibreOffice (`soffice`).
///
/// `soffice` picks its own output name (`<input stem>.<ext>`), so each call
/// converts into a private scratch directory and then moves the result to
/// the requested path.
#[derive(Debug, Clone)]
pub struct LibreOffice {
    binary: PathBuf,
}

impl LibreOffice {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    /// Import filter needed when the source is a PDF.
    fn import_filter(input: &Path, target: DocumentFormat) -> Option<&'static str> {
        if extension_of(input) != "pdf" {
            return None;
        }
        match target {
            DocumentFormat::Docx => Some("writer_pdf_import"),
            DocumentFormat::Pptx => Some("impress_pdf_import"),
            DocumentFormat::Xlsx | DocumentFormat::Pdf => None,
        }
    }

    fn command(&self, input: &Path, outdir: &Path, target: DocumentFormat) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless").arg("--norestore");
        if let Some(filter) = Self::import_filter(input, target) {
            cmd.arg(format!("--infilter={filter}"));
        }
        cmd.args(["--convert-to", target.extension()])
            .arg("--outdir")
            .arg(outdir)
            .arg(input);
        cmd
    }
}

#[async_trait]
impl DocumentConverter for LibreOffice {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        target: DocumentFormat,
    ) -> Result<(), PipelineError> {
        let scratch = tempfile::Builder::new()
            .prefix("docpipe_soffice_")
            .tempdir()
            .map_err(|e| PipelineError::tool(TOOL, format!("could not create scratch dir: {e}")))?;

        run_tool(TOOL, self.command(input, scratch.path(), target)).await?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let produced = scratch.path().join(format!("{stem}.{}", target.extension()));
        if !produced.exists() {
            return Err(PipelineError::tool(
                TOOL,
                format!("no {target} written for {}", input.display()),
            ));
        }

        tokio::fs::copy(&produced, output)
            .await
            .map_err(|e| PipelineError::io(output, e))?;
        debug!("Converted {} -> {}", input.display(), output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(input: &str, target: DocumentFormat) -> Vec<String> {
        LibreOffice::new("soffice")
            .command(Path::new(input), Path::new("/scratch"), target)
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn office_to_pdf_needs_no_filter() {
        let a = args("/tmp/report.docx", DocumentFormat::Pdf);
        assert!(a.contains(&"--headless".to_string()));
        assert!(!a.iter().any(|x| x.starts_with("--infilter")));
        assert!(a.windows(2).any(|w| w == ["--convert-to", "pdf"]));
        assert_eq!(a.last().map(String::as_str), Some("/tmp/report.docx"));
    }

    #[test]
    fn pdf_sources_get_an_import_filter() {
        let a = args("/tmp/scan.pdf", DocumentFormat::Docx);
        assert!(a.contains(&"--infilter=writer_pdf_import".to_string()));
        let a = args("/tmp/scan.pdf", DocumentFormat::Pptx);
        assert!(a.contains(&"--infilter=impress_pdf_import".to_string()));
    }
}
