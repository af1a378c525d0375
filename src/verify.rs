//! Integrity verification of produced files.
//!
//! Rules, in order:
//!
//! 1. The file exists and is non-empty.
//! 2. If the extension says PDF, the file starts with `%PDF-` and a
//!    structural parser can open it. Zero-page documents pass.
//!
//! Anything else is checked by size alone. This catches truncated or
//! corrupted output; it says nothing about whether the conversion is right.
//!
//! ## Why a parser trait?
//!
//! The structural check is done by pdfium, a native library bound at
//! runtime. [`PdfParser`] keeps that behind a seam so tests and hosts
//! without pdfium can plug in their own parser.

use crate::job::extension_of;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

/// Opens a PDF and reports its page count.
pub trait PdfParser: Send + Sync {
    fn page_count(&self, path: &Path) -> Result<usize, String>;
}

/// pdfium-backed structural parser.
///
/// Binds per call: to `library` when given, otherwise to the system copy of
/// pdfium.
pub struct PdfiumParser {
    library: Option<PathBuf>,
}

impl PdfiumParser {
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    fn bind(&self) -> Result<Pdfium, String> {
        let bindings = match &self.library {
            Some(path) => {
                let resolved = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(path)
                } else {
                    path.clone()
                };
                Pdfium::bind_to_library(resolved)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| format!("Failed to bind to pdfium library: {e:?}"))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfParser for PdfiumParser {
    fn page_count(&self, path: &Path) -> Result<usize, String> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| format!("{e:?}"))?;
        let pages = document.pages().len() as usize;
        Ok(pages)
    }
}

/// Confirms produced files are non-empty and, for PDFs, structurally valid.
#[derive(Clone)]
pub struct IntegrityVerifier {
    parser: Arc<dyn PdfParser>,
}

impl IntegrityVerifier {
    pub fn new(parser: Arc<dyn PdfParser>) -> Self {
        Self { parser }
    }

    /// Verifier backed by pdfium.
    pub fn pdfium(library: Option<PathBuf>) -> Self {
        Self::new(Arc::new(PdfiumParser::new(library)))
    }

    /// `true` when `path` passes every rule. Failures are logged, not returned.
    pub async fn verify(&self, path: &Path) -> bool {
        match self.check(path).await {
            Ok(()) => true,
            Err(reason) => {
                error!("Integrity check failed for {}: {}", path.display(), reason);
                false
            }
        }
    }

    /// Like [`verify`](Self::verify) but returns the reason for a failure.
    pub async fn check(&self, path: &Path) -> Result<(), String> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("cannot stat file: {e}"))?;
        if !meta.is_file() {
            return Err("not a regular file".into());
        }
        if meta.len() == 0 {
            return Err("file is empty".into());
        }

        if extension_of(path) != "pdf" {
            return Ok(());
        }

        let mut header = [0u8; 5];
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| format!("cannot open file: {e}"))?;
        file.read_exact(&mut header)
            .await
            .map_err(|_| "file shorter than a PDF header".to_string())?;
        if &header != b"%PDF-" {
            return Err(format!("invalid PDF header: {header:?}"));
        }

        let parser = Arc::clone(&self.parser);
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || parser.page_count(&owned))
            .await
            .map_err(|e| format!("parser task panicked: {e}"))??;
        // Zero pages is accepted: some converters emit an empty document for
        // empty input and that is not a corruption.
        debug!("Verified {} ({} pages)", path.display(), pages);
        Ok(())
    }
}

/// Flush a produced file to stable storage before it is measured.
pub async fn sync_file(path: &Path) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
    file.sync_all().await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Parser double: accepts anything with `%%EOF`, rejects the rest.
    pub(crate) struct TrailerParser;

    impl PdfParser for TrailerParser {
        fn page_count(&self, path: &Path) -> Result<usize, String> {
            let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
            let text = String::from_utf8_lossy(&bytes);
            if text.contains("%%EOF") {
                Ok(text.matches("/Type /Page\n").count())
            } else {
                Err("no trailer".into())
            }
        }
    }

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(Arc::new(TrailerParser))
    }

    #[tokio::test]
    async fn missing_and_empty_files_fail() {
        let dir = TempDir::new().unwrap();
        assert!(!verifier().verify(&dir.path().join("nope.png")).await);

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(!verifier().verify(&empty).await);
    }

    #[tokio::test]
    async fn non_pdf_checked_by_size_only() {
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("out.docx");
        std::fs::write(&f, b"PK garbage").unwrap();
        assert!(verifier().verify(&f).await);
    }

    #[tokio::test]
    async fn pdf_needs_signature() {
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("out.pdf");
        std::fs::write(&f, b"<html>%%EOF").unwrap();
        let err = verifier().check(&f).await.unwrap_err();
        assert!(err.contains("header"), "got: {err}");

        let short = dir.path().join("short.pdf");
        std::fs::write(&short, b"%PD").unwrap();
        assert!(!verifier().verify(&short).await);
    }

    #[tokio::test]
    async fn pdf_needs_structure() {
        let dir = TempDir::new().unwrap();
        let truncated = dir.path().join("truncated.pdf");
        std::fs::write(&truncated, b"%PDF-1.4\n1 0 obj").unwrap();
        assert!(!verifier().verify(&truncated).await);
    }

    #[tokio::test]
    async fn zero_page_pdf_is_accepted() {
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("empty_doc.PDF");
        std::fs::write(&f, b"%PDF-1.4\n%%EOF\n").unwrap();
        assert!(verifier().verify(&f).await);
    }

    #[tokio::test]
    async fn sync_file_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("x.bin");
        assert!(sync_file(&f).await.is_err());
        std::fs::write(&f, b"1").unwrap();
        sync_file(&f).await.unwrap();
        assert_eq!(std::fs::read(&f).unwrap(), b"1");
    }
}
