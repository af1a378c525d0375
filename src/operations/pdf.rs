//! PDF-producing operations built on the renderer and the compressor.

use super::{require_valid_pdf, single_input, Descriptor, ExecContext, Operation, OperationDefaults, OutputNaming};
use crate::compress::compress_to_size;
use crate::error::PipelineError;
use crate::fanout::run_all;
use crate::imaging;
use crate::job::{FileReference, Params};
use crate::params::{parse_size_to_bytes, ResizeSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];

/// Require a parseable `size`, defaulting it first.
fn prepare_target_size(
    operation: &str,
    params: &mut Params,
    defaults: &OperationDefaults,
) -> Result<(), PipelineError> {
    params.default_to("size", &defaults.target_size);
    target_bytes(operation, params).map(|_| ())
}

fn target_bytes(operation: &str, params: &Params) -> Result<u64, PipelineError> {
    let raw = params.get("size").unwrap_or_default();
    parse_size_to_bytes(raw).ok_or_else(|| {
        PipelineError::validation(
            operation,
            format!("invalid size '{raw}', expected a value like 500kb or 2MB"),
        )
    })
}

// ── convert_and_compress_to_pdf ──────────────────────────────────────────

/// Shrink every image towards the target, assemble one PDF, then compress
/// that PDF to the target if it is still too large.
pub struct ConvertAndCompressToPdf {
    descriptor: Descriptor,
}

impl ConvertAndCompressToPdf {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor {
                name: "convert_and_compress_to_pdf",
                summary: "Resize images, assemble them into a PDF and compress it to a target size",
                min_inputs: 1,
                max_inputs: None,
                accepted_extensions: IMAGE_EXTENSIONS,
                outputs: OutputNaming::Fixed(&[("converted", "pdf"), ("compressed", "pdf")]),
                pair_fallback: false,
                compressed_output: Some(1),
            },
        }
    }
}

impl Default for ConvertAndCompressToPdf {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for ConvertAndCompressToPdf {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        _inputs: &[FileReference],
        params: &mut Params,
        defaults: &OperationDefaults,
    ) -> Result<(), PipelineError> {
        prepare_target_size(self.descriptor.name, params, defaults)
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let target = target_bytes(self.descriptor.name, params)?;
        let converted = ctx.output(0)?;
        let compressed = ctx.output(1)?;

        let tasks: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let resized = ctx.scratch(&format!("resized_{}_{}", i, input.file_name()));
                let source = input.path.clone();
                move || async move {
                    imaging::resize(&source, &resized.path, ResizeSpec::TargetBytes(target)).await?;
                    Ok::<PathBuf, PipelineError>(resized.path)
                }
            })
            .collect();
        let resized = run_all(tasks, ctx.fanout_workers).await?;

        let html = imaging::images_page_html(&resized).await?;
        ctx.tools
            .renderer
            .render_html(&html, &converted.path)
            .await?;

        let rendered_size = tokio::fs::metadata(&converted.path)
            .await
            .map_err(|e| PipelineError::io(&converted.path, e))?
            .len();
        info!(
            "Initial PDF size: {} bytes, desired size: {} bytes",
            rendered_size, target
        );

        if rendered_size > target {
            compress_to_size(
                ctx.tools.compressor.as_ref(),
                &converted.path,
                &compressed.path,
                target,
            )
            .await?;
        } else {
            tokio::fs::copy(&converted.path, &compressed.path)
                .await
                .map_err(|e| PipelineError::io(&compressed.path, e))?;
        }

        Ok(vec![converted.clone(), compressed.clone()])
    }
}

// ── images_to_pdf ────────────────────────────────────────────────────────

/// One PDF page per image, in input order.
pub struct ImagesToPdf {
    descriptor: Descriptor,
}

impl ImagesToPdf {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor {
                name: "images_to_pdf",
                summary: "Combine images into one PDF, one page per image",
                min_inputs: 1,
                max_inputs: None,
                accepted_extensions: IMAGE_EXTENSIONS,
                outputs: OutputNaming::Fixed(&[("images_to_pdf", "pdf")]),
                pair_fallback: false,
                compressed_output: None,
            },
        }
    }
}

impl Default for ImagesToPdf {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for ImagesToPdf {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        _params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let output = ctx.output(0)?;
        let paths: Vec<PathBuf> = inputs.iter().map(|f| f.path.clone()).collect();
        let html = imaging::images_page_html(&paths).await?;
        ctx.tools.renderer.render_html(&html, &output.path).await?;
        Ok(vec![output.clone()])
    }
}

// ── compress_to_size ─────────────────────────────────────────────────────

/// Compress one PDF towards a byte budget.
pub struct CompressToSize {
    descriptor: Descriptor,
}

impl CompressToSize {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor {
                name: "compress_to_size",
                summary: "Compress a PDF until it fits a target size",
                min_inputs: 1,
                max_inputs: Some(1),
                accepted_extensions: &["pdf"],
                outputs: OutputNaming::Fixed(&[("compressed", "pdf")]),
                pair_fallback: false,
                compressed_output: Some(0),
            },
        }
    }
}

impl Default for CompressToSize {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for CompressToSize {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        _inputs: &[FileReference],
        params: &mut Params,
        defaults: &OperationDefaults,
    ) -> Result<(), PipelineError> {
        params.default_to("use_last", "false");
        prepare_target_size(self.descriptor.name, params, defaults)
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let name = self.descriptor.name;
        let input = single_input(name, inputs)?;
        let target = target_bytes(name, params)?;
        require_valid_pdf(ctx, name, input).await?;

        let output = ctx.output(0)?;
        let report = compress_to_size(
            ctx.tools.compressor.as_ref(),
            &input.path,
            &output.path,
            target,
        )
        .await?;
        info!(
            "Compressed {} → {} bytes in {} attempt(s)",
            input.file_name(),
            report.final_size(),
            report.attempts.len()
        );
        Ok(vec![output.clone()])
    }
}
