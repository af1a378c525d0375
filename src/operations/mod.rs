//! Operations: the named conversion capabilities a job can run.
//!
//! Each operation implements [`Operation`], a two-phase contract:
//!
//! 1. [`Operation::prepare`] checks and completes the parameters (defaults
//!    substituted) at submission time, before any job exists.
//! 2. [`Operation::execute`] does the work against an [`ExecContext`] and
//!    returns the produced outputs. It may be called again on retry, so it
//!    only ever writes to paths the context hands out.
//!
//! Static facts about an operation (arity, accepted input types, output
//! naming) live in its [`Descriptor`]. The [`OperationRegistry`] maps names
//! to instances and is built once at startup.

mod document;
mod images;
mod pair;
mod pdf;
mod registry;

pub use document::DocumentConversion;
pub use images::{ConvertImageFormat, ResizeImage};
pub use pair::{ParallelPairOperation, SubOperation};
pub use pdf::{CompressToSize, ConvertAndCompressToPdf, ImagesToPdf};
pub use registry::{OperationDefaults, OperationRegistry};

use crate::error::PipelineError;
use crate::job::{FileReference, FileRole, JobId, Params};
use crate::params::TargetImageFormat;
use crate::staging::FileStaging;
use crate::tools::Toolchain;
use crate::verify::IntegrityVerifier;
use async_trait::async_trait;
use std::sync::Mutex;

/// One registered conversion capability.
#[async_trait]
pub trait Operation: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    /// Check operation-specific parameters and fill in defaults.
    ///
    /// Arity and input extensions are already checked by the registry.
    fn prepare(
        &self,
        inputs: &[FileReference],
        params: &mut Params,
        defaults: &OperationDefaults,
    ) -> Result<(), PipelineError> {
        let _ = (inputs, params, defaults);
        Ok(())
    }

    /// Run the operation, returning every produced output in declared order.
    async fn execute(
        &self,
        ctx: &ExecContext,
        inputs: &[FileReference],
        params: &Params,
    ) -> Result<Vec<FileReference>, PipelineError>;
}

// ── Descriptor ───────────────────────────────────────────────────────────

/// Immutable facts about an operation.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: &'static str,
    pub summary: &'static str,
    pub min_inputs: usize,
    /// `None` means no operation-specific upper bound.
    pub max_inputs: Option<usize>,
    /// Accepted input extensions, lower-case. Empty accepts anything.
    pub accepted_extensions: &'static [&'static str],
    pub outputs: OutputNaming,
    /// Terminal failures report the all-null pair payload instead of an error.
    pub pair_fallback: bool,
    /// Index of the output to remember as "last compressed", if any.
    pub compressed_output: Option<usize>,
}

impl Descriptor {
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.accepted_extensions.is_empty() || self.accepted_extensions.contains(&ext)
    }

    /// Human-readable arity, e.g. `"1"`, `"2"`, `"1..N"`.
    pub fn arity(&self) -> String {
        match self.max_inputs {
            Some(max) if max == self.min_inputs => max.to_string(),
            Some(max) => format!("{}..{}", self.min_inputs, max),
            None => format!("{}..N", self.min_inputs),
        }
    }

    /// The output files a job will produce, in declared order.
    pub fn planned_outputs(
        &self,
        staging: &FileStaging,
        job: &JobId,
        inputs: &[FileReference],
        params: &Params,
    ) -> Vec<FileReference> {
        self.outputs
            .plan(inputs, params)
            .into_iter()
            .map(|(stem, ext)| staging.output_for(job, &stem, &ext))
            .collect()
    }
}

/// How an operation names its outputs. Every name is `<stem>_<job id>.<ext>`.
#[derive(Debug, Clone, Copy)]
pub enum OutputNaming {
    /// Fixed `(stem, extension)` pairs.
    Fixed(&'static [(&'static str, &'static str)]),
    /// `img_to_<fmt>` with the extension of the `format` parameter.
    ImageFormat,
    /// Given stem with the first input's extension.
    SameAsInput(&'static str),
    /// `first_output` / `second_output`, extension per sub-operation.
    PairSides,
}

impl OutputNaming {
    /// `(stem, extension)` for each output.
    pub fn plan(&self, inputs: &[FileReference], params: &Params) -> Vec<(String, String)> {
        match self {
            OutputNaming::Fixed(pairs) => pairs
                .iter()
                .map(|(stem, ext)| (stem.to_string(), ext.to_string()))
                .collect(),
            OutputNaming::ImageFormat => {
                let ext = params
                    .get("format")
                    .and_then(TargetImageFormat::parse)
                    .unwrap_or(TargetImageFormat::Jpeg)
                    .extension();
                vec![(format!("img_to_{ext}"), ext.to_string())]
            }
            OutputNaming::SameAsInput(stem) => {
                let ext = inputs.first().map(|f| f.extension()).unwrap_or_default();
                vec![(stem.to_string(), ext)]
            }
            OutputNaming::PairSides => {
                let sides = [
                    ("first_output", "first_op", SubOperation::ConvertToPdf),
                    ("second_output", "second_op", SubOperation::Resize),
                ];
                sides
                    .iter()
                    .enumerate()
                    .map(|(i, (stem, key, default))| {
                        let op = params
                            .get(key)
                            .and_then(SubOperation::parse)
                            .unwrap_or(*default);
                        let input_ext = inputs.get(i).map(|f| f.extension()).unwrap_or_default();
                        (stem.to_string(), op.output_extension(&input_ext))
                    })
                    .collect()
            }
        }
    }
}

// ── Execution context ────────────────────────────────────────────────────

/// Everything an operation may touch while executing one attempt.
pub struct ExecContext {
    pub job_id: JobId,
    pub staging: FileStaging,
    pub tools: Toolchain,
    pub verifier: IntegrityVerifier,
    /// Bound for homogeneous fan-out inside the job.
    pub fanout_workers: usize,
    outputs: Vec<FileReference>,
    scratch: Mutex<Vec<FileReference>>,
}

impl ExecContext {
    pub fn new(
        job_id: JobId,
        staging: FileStaging,
        tools: Toolchain,
        verifier: IntegrityVerifier,
        fanout_workers: usize,
        outputs: Vec<FileReference>,
    ) -> Self {
        Self {
            job_id,
            staging,
            tools,
            verifier,
            fanout_workers,
            outputs,
            scratch: Mutex::new(Vec::new()),
        }
    }

    /// The `index`-th planned output.
    pub fn output(&self, index: usize) -> Result<&FileReference, PipelineError> {
        self.outputs.get(index).ok_or_else(|| {
            PipelineError::Internal(format!(
                "job {} has no planned output #{}",
                self.job_id, index
            ))
        })
    }

    pub fn outputs(&self) -> &[FileReference] {
        &self.outputs
    }

    /// Allocate an intermediate file in the temp area. It is released when
    /// the attempt ends, whatever the outcome.
    pub fn scratch(&self, suggested_name: &str) -> FileReference {
        let file = self.staging.allocate(FileRole::Input, suggested_name);
        self.scratch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(file.clone());
        file
    }

    /// Hand over every scratch file allocated so far.
    pub fn take_scratch(&self) -> Vec<FileReference> {
        std::mem::take(
            &mut *self
                .scratch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// The single input of a one-input operation.
pub(crate) fn single_input<'a>(
    operation: &str,
    inputs: &'a [FileReference],
) -> Result<&'a FileReference, PipelineError> {
    match inputs {
        [one] => Ok(one),
        _ => Err(PipelineError::validation(
            operation,
            format!("expected exactly 1 input, got {}", inputs.len()),
        )),
    }
}

/// Fail with a validation error unless `input` is a structurally valid PDF.
pub(crate) async fn require_valid_pdf(
    ctx: &ExecContext,
    operation: &str,
    input: &FileReference,
) -> Result<(), PipelineError> {
    ctx.verifier.check(&input.path).await.map_err(|reason| {
        PipelineError::validation(
            operation,
            format!("input {} is not a valid PDF: {}", input.file_name(), reason),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(names: &[&str]) -> Vec<FileReference> {
        names
            .iter()
            .map(|n| FileReference::new(format!("/tmp/{n}"), FileRole::Input))
            .collect()
    }

    #[test]
    fn image_format_naming_follows_param() {
        let mut p = Params::default();
        p.insert("format", "png");
        let plan = OutputNaming::ImageFormat.plan(&refs(&["a.jpg"]), &p);
        assert_eq!(plan, vec![("img_to_png".to_string(), "png".to_string())]);

        let plan = OutputNaming::ImageFormat.plan(&refs(&["a.png"]), &Params::default());
        assert_eq!(plan[0].1, "jpeg");
    }

    #[test]
    fn pair_naming_depends_on_sub_operations() {
        let p: Params = [("first_op", "resize"), ("second_op", "convert_to_pdf")]
            .into_iter()
            .collect();
        let plan = OutputNaming::PairSides.plan(&refs(&["a.png", "b.docx"]), &p);
        assert_eq!(plan[0], ("first_output".to_string(), "png".to_string()));
        assert_eq!(plan[1], ("second_output".to_string(), "pdf".to_string()));
    }

    #[test]
    fn planned_outputs_are_job_scoped() {
        let root = tempfile::TempDir::new().unwrap();
        let staging =
            FileStaging::ensure(root.path().join("t"), root.path().join("p")).unwrap();
        let d = Descriptor {
            name: "x",
            summary: "",
            min_inputs: 1,
            max_inputs: Some(1),
            accepted_extensions: &[],
            outputs: OutputNaming::Fixed(&[("converted", "pdf"), ("compressed", "pdf")]),
            pair_fallback: false,
            compressed_output: Some(1),
        };
        let id = JobId::from("42");
        let out = d.planned_outputs(&staging, &id, &[], &Params::default());
        let names: Vec<_> = out.iter().map(|f| f.file_name()).collect();
        assert_eq!(names, ["converted_42.pdf", "compressed_42.pdf"]);
        assert!(out.iter().all(|f| f.role == FileRole::Output));
        assert_eq!(d.arity(), "1");
    }
}
