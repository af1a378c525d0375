//! Two unrelated sub-operations on two files, run side by side.

use super::{Descriptor, ExecContext, Operation, OperationDefaults, OutputNaming};
use crate::error::PipelineError;
use crate::fanout::run_pair;
use crate::imaging::{self, is_image_extension};
use crate::job::{FileReference, Params};
use crate::params::ResizeSpec;
use crate::tools::DocumentFormat;
use async_trait::async_trait;
use std::fmt;
use tracing::info;

const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "ppt", "pptx", "xls", "xlsx", "odt"];
const MARKUP_EXTENSIONS: &[&str] = &["html", "htm", "txt"];

/// What one side of a pair does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOperation {
    ConvertToPdf,
    Resize,
}

impl SubOperation {
    /// Accepts `convert_to_pdf`, `resize` and `resize_image`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "convert_to_pdf" => Some(SubOperation::ConvertToPdf),
            "resize" | "resize_image" => Some(SubOperation::Resize),
            _ => None,
        }
    }

    pub fn output_extension(&self, input_ext: &str) -> String {
        match self {
            SubOperation::ConvertToPdf => "pdf".to_string(),
            SubOperation::Resize => input_ext.to_string(),
        }
    }

    fn accepts(&self, ext: &str) -> bool {
        match self {
            SubOperation::Resize => is_image_extension(ext),
            SubOperation::ConvertToPdf => {
                is_image_extension(ext)
                    || OFFICE_EXTENSIONS.contains(&ext)
                    || MARKUP_EXTENSIONS.contains(&ext)
            }
        }
    }
}

impl fmt::Display for SubOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubOperation::ConvertToPdf => f.write_str("convert_to_pdf"),
            SubOperation::Resize => f.write_str("resize"),
        }
    }
}

/// `first_op` on the first file while `second_op` runs on the second.
///
/// A pair never half-succeeds: either both outputs are reported or, once
/// retries are spent, the all-null fallback payload is.
pub struct ParallelPairOperation {
    descriptor: Descriptor,
}

impl ParallelPairOperation {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor {
                name: "parallel_pair_operation",
                summary: "Run two independent operations on two files concurrently",
                min_inputs: 2,
                max_inputs: Some(2),
                accepted_extensions: &[],
                outputs: OutputNaming::PairSides,
                pair_fallback: true,
                compressed_output: None,
            },
        }
    }

    fn sub_operation(&self, params: &Params, key: &str) -> Result<SubOperation, PipelineError> {
        let raw = params.get(key).unwrap_or_default();
        SubOperation::parse(raw).ok_or_else(|| {
            PipelineError::validation(
                self.descriptor.name,
                format!("unsupported {key} '{raw}' (expected convert_to_pdf or resize)"),
            )
        })
    }
}

impl Default for ParallelPairOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for ParallelPairOperation {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        inputs: &[FileReference],
        params: &mut Params,
        _defaults: &OperationDefaults,
    ) -> Result<(), PipelineError> {
        params.default_to("first_op", "convert_to_pdf");
        params.default_to("second_op", "resize");

        let sides = [
            self.sub_operation(params, "first_op")?,
            self.sub_operation(params, "second_op")?,
        ];
        for (op, input) in sides.iter().zip(inputs) {
            let ext = input.extension();
            if !op.accepts(&ext) {
                return Err(PipelineError::validation(
                    self.descriptor.name,
                    format!("{op} cannot take '{}'", input.file_name()),
                ));
            }
        }
        if sides.contains(&SubOperation::Resize) && ResizeSpec::from_params(params).is_none() {
            return Err(PipelineError::validation(
                self.descriptor.name,
                "resize needs size, width and height, resolution, or aspect",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let (first_input, second_input) = match inputs {
            [a, b] => (a, b),
            _ => {
                return Err(PipelineError::validation(
                    self.descriptor.name,
                    format!("expected exactly 2 inputs, got {}", inputs.len()),
                ))
            }
        };
        let first_op = self.sub_operation(params, "first_op")?;
        let second_op = self.sub_operation(params, "second_op")?;
        let first_out = ctx.output(0)?;
        let second_out = ctx.output(1)?;

        info!(
            "Starting parallel operations: {} on {}, {} on {}",
            first_op,
            first_input.file_name(),
            second_op,
            second_input.file_name()
        );

        run_pair(
            run_side(ctx, first_op, first_input, first_out, params),
            run_side(ctx, second_op, second_input, second_out, params),
        )
        .await?;

        Ok(vec![first_out.clone(), second_out.clone()])
    }
}

async fn run_side(
    ctx: &ExecContext,
    op: SubOperation,
    input: &FileReference,
    output: &FileReference,
    params: &Params,
) -> Result<(), PipelineError> {
    match op {
        SubOperation::Resize => {
            let spec = ResizeSpec::from_params(params).ok_or_else(|| {
                PipelineError::validation("parallel_pair_operation", "missing resize parameters")
            })?;
            imaging::resize(&input.path, &output.path, spec).await
        }
        SubOperation::ConvertToPdf => convert_to_pdf(ctx, input, output).await,
    }
}

/// Convert any supported single file to PDF, choosing the tool by type.
async fn convert_to_pdf(
    ctx: &ExecContext,
    input: &FileReference,
    output: &FileReference,
) -> Result<(), PipelineError> {
    let ext = input.extension();
    if is_image_extension(&ext) {
        let html = imaging::images_page_html(std::slice::from_ref(&input.path)).await?;
        return ctx.tools.renderer.render_html(&html, &output.path).await;
    }
    if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
        return ctx
            .tools
            .converter
            .convert(&input.path, &output.path, DocumentFormat::Pdf)
            .await;
    }

    let text = tokio::fs::read_to_string(&input.path)
        .await
        .map_err(|e| PipelineError::io(&input.path, e))?;
    let html = if ext == "txt" {
        format!("<html><body><pre>{}</pre></body></html>", escape_html(&text))
    } else {
        text
    };
    ctx.tools.renderer.render_html(&html, &output.path).await
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileRole;

    fn inputs(names: &[&str]) -> Vec<FileReference> {
        names
            .iter()
            .map(|n| FileReference::new(format!("/tmp/{n}"), FileRole::Input))
            .collect()
    }

    #[test]
    fn sub_operation_names() {
        assert_eq!(SubOperation::parse("resize_image"), Some(SubOperation::Resize));
        assert_eq!(SubOperation::parse("convert_to_pdf"), Some(SubOperation::ConvertToPdf));
        assert_eq!(SubOperation::parse("explode"), None);
        assert_eq!(SubOperation::Resize.output_extension("gif"), "gif");
    }

    #[test]
    fn prepare_fills_defaults_and_checks_resize_params() {
        let op = ParallelPairOperation::new();
        let mut params = Params::default();
        let err = op
            .prepare(&inputs(&["a.docx", "b.png"]), &mut params, &OperationDefaults::default())
            .unwrap_err();
        assert!(err.to_string().contains("resize needs"), "got: {err}");
        assert_eq!(params.get("first_op"), Some("convert_to_pdf"));
        assert_eq!(params.get("second_op"), Some("resize"));

        params.insert("width", "100");
        params.insert("height", "80");
        op.prepare(&inputs(&["a.docx", "b.png"]), &mut params, &OperationDefaults::default())
            .unwrap();
    }

    #[test]
    fn prepare_rejects_mismatched_side() {
        let op = ParallelPairOperation::new();
        let mut params: Params = [("aspect", "4:3")].into_iter().collect();
        let err = op
            .prepare(&inputs(&["a.png", "b.pdf"]), &mut params, &OperationDefaults::default())
            .unwrap_err();
        assert!(err.to_string().contains("resize cannot take"), "got: {err}");
    }

    #[test]
    fn prepare_rejects_unknown_sub_operation() {
        let op = ParallelPairOperation::new();
        let mut params: Params = [("first_op", "teleport")].into_iter().collect();
        assert!(op
            .prepare(&inputs(&["a.png", "b.png"]), &mut params, &OperationDefaults::default())
            .is_err());
    }

    #[test]
    fn html_escaping() {
        assert_eq!(escape_html("a<b & c>"), "a&lt;b &amp; c&gt;");
    }
}
