//! Single-image operations.

use super::{single_input, Descriptor, ExecContext, Operation, OperationDefaults, OutputNaming};
use crate::error::PipelineError;
use crate::imaging;
use crate::job::{FileReference, Params};
use crate::params::{ResizeSpec, TargetImageFormat};
use async_trait::async_trait;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];

// ── convert_image_format ─────────────────────────────────────────────────

pub struct ConvertImageFormat {
    descriptor: Descriptor,
}

impl ConvertImageFormat {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor {
                name: "convert_image_format",
                summary: "Re-encode an image as PNG, JPEG, JPG, BMP or GIF",
                min_inputs: 1,
                max_inputs: Some(1),
                accepted_extensions: IMAGE_EXTENSIONS,
                outputs: OutputNaming::ImageFormat,
                pair_fallback: false,
                compressed_output: None,
            },
        }
    }

    fn format(&self, params: &Params) -> Result<TargetImageFormat, PipelineError> {
        let raw = params.get("format").unwrap_or_default();
        TargetImageFormat::parse(raw).ok_or_else(|| {
            PipelineError::validation(
                self.descriptor.name,
                format!("unsupported image format '{raw}' (expected PNG, JPEG, JPG, BMP or GIF)"),
            )
        })
    }
}

impl Default for ConvertImageFormat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for ConvertImageFormat {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        _inputs: &[FileReference],
        params: &mut Params,
        _defaults: &OperationDefaults,
    ) -> Result<(), PipelineError> {
        params.default_to("format", "JPEG");
        self.format(params).map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let input = single_input(self.descriptor.name, inputs)?;
        let format = self.format(params)?;
        let output = ctx.output(0)?;
        imaging::convert_format(&input.path, &output.path, format).await?;
        Ok(vec![output.clone()])
    }
}

// ── resize_image ─────────────────────────────────────────────────────────

/// Resize by byte target, exact dimensions, or aspect ratio.
pub struct ResizeImage {
    descriptor: Descriptor,
}

impl ResizeImage {
    pub fn new() -> Self {
        Self {
            descriptor: Descriptor {
                name: "resize_image",
                summary: "Resize an image by target size, dimensions or aspect ratio",
                min_inputs: 1,
                max_inputs: Some(1),
                accepted_extensions: IMAGE_EXTENSIONS,
                outputs: OutputNaming::SameAsInput("resized_image"),
                pair_fallback: false,
                compressed_output: None,
            },
        }
    }

    fn spec(&self, params: &Params) -> Result<ResizeSpec, PipelineError> {
        ResizeSpec::from_params(params).ok_or_else(|| {
            PipelineError::validation(
                self.descriptor.name,
                "needs a valid size, width and height, resolution, or aspect",
            )
        })
    }
}

impl Default for ResizeImage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for ResizeImage {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        _inputs: &[FileReference],
        params: &mut Params,
        _defaults: &OperationDefaults,
    ) -> Result<(), PipelineError> {
        self.spec(params).map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError> {
        let input = single_input(self.descriptor.name, inputs)?;
        let spec = self.spec(params)?;
        let output = ctx.output(0)?;
        imaging::resize(&input.path, &output.path, spec).await?;
        Ok(vec![output.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_jpeg() {
        let op = ConvertImageFormat::new();
        let mut params = Params::default();
        op.prepare(&[], &mut params, &OperationDefaults::default()).unwrap();
        assert_eq!(params.get("format"), Some("JPEG"));

        let mut bad: Params = [("format", "tiff")].into_iter().collect();
        assert!(op.prepare(&[], &mut bad, &OperationDefaults::default()).is_err());
    }

    #[test]
    fn resize_requires_a_mode() {
        let op = ResizeImage::new();
        assert!(op
            .prepare(&[], &mut Params::default(), &OperationDefaults::default())
            .is_err());
        let mut ok: Params = [("resolution", "640x480")].into_iter().collect();
        op.prepare(&[], &mut ok, &OperationDefaults::default()).unwrap();
    }
}
