//! Office-document conversions through the [`DocumentConverter`] capability.
//!
//! [`DocumentConverter`]: crate::tools::DocumentConverter

use super::{require_valid_pdf, single_input, Descriptor, ExecContext, Operation, OutputNaming};
use crate::error::PipelineError;
use crate::job::{FileReference, Params};
use crate::tools::DocumentFormat;
use async_trait::async_trait;

/// One `format_a → format_b` conversion.
pub struct DocumentConversion {
    descriptor: Descriptor,
    target: DocumentFormat,
}

impl DocumentConversion {
    const fn new(
        name: &'static str,
        summary: &'static str,
        accepted: &'static [&'static str],
        outputs: &'static [(&'static str, &'static str)],
        target: DocumentFormat,
    ) -> Self {
        Self {
            descriptor: Descriptor {
                name,
                summary,
                min_inputs: 1,
                max_inputs: Some(1),
                accepted_extensions: accepted,
                outputs: OutputNaming::Fixed(outputs),
                pair_fallback: false,
                compressed_output: None,
            },
            target,
        }
    }

    /// The six built-in conversions.
    pub fn catalogue() -> [DocumentConversion; 6] {
        [
            Self::new(
                "word_to_pdf",
                "Convert a Word document to PDF",
                &["docx"],
                &[("word_to_pdf", "pdf")],
                DocumentFormat::Pdf,
            ),
            Self::new(
                "pdf_to_word",
                "Convert a PDF to a Word document",
                &["pdf"],
                &[("pdf_to_word", "docx")],
                DocumentFormat::Docx,
            ),
            Self::new(
                "ppt_to_pdf",
                "Convert a PowerPoint presentation to PDF",
                &["ppt", "pptx"],
                &[("ppt_to_pdf", "pdf")],
                DocumentFormat::Pdf,
            ),
            Self::new(
                "excel_to_pdf",
                "Convert an Excel workbook to PDF",
                &["xls", "xlsx"],
                &[("excel_to_pdf", "pdf")],
                DocumentFormat::Pdf,
            ),
            Self::new(
                "pdf_to_excel",
                "Extract a PDF into an Excel workbook",
                &["pdf"],
                &[("pdf_to_excel", "xlsx")],
                DocumentFormat::Xlsx,
            ),
            Self::new(
                "pdf_to_ppt",
                "Convert a PDF to a PowerPoint presentation",
                &["pdf"],
                &[("pdf_to_ppt", "pptx")],
                DocumentFormat::Pptx,
            ),
        ]
    }

    pub fn target(&self) -> DocumentFormat {
        self.target
    }
}

#[async_trait]
impl Operation for DocumentConversion {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        _params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let name = self.descriptor.name;
        let input = single_input(name, inputs)?;
        if input.extension() == "pdf" {
            require_valid_pdf(ctx, name, input).await?;
        }

        let output = ctx.output(0)?;
        ctx.tools
            .converter
            .convert(&input.path, &output.path, self.target)
            .await?;
        Ok(vec![output.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_names_match_output_stems() {
        for conv in DocumentConversion::catalogue() {
            let d = conv.descriptor();
            match d.outputs {
                OutputNaming::Fixed(pairs) => {
                    assert_eq!(pairs.len(), 1);
                    assert_eq!(pairs[0].0, d.name);
                    assert_eq!(pairs[0].1, conv.target().extension());
                }
                other => panic!("unexpected naming {other:?}"),
            }
            assert_eq!(d.arity(), "1");
        }
    }
}
