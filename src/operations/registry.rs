//! Static operation registry.
//!
//! Built once from the configuration and shared behind an `Arc`; nothing
//! mutates it after construction.

use super::{
    CompressToSize, ConvertAndCompressToPdf, ConvertImageFormat, Descriptor, DocumentConversion,
    ImagesToPdf, Operation, ParallelPairOperation, ResizeImage,
};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{FileReference, Params};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Legacy operation names accepted on submission.
const ALIASES: &[(&str, &str)] = &[
    ("convert_and_compress_images_to_pdf", "convert_and_compress_to_pdf"),
    ("convert_parallel_operations", "parallel_pair_operation"),
    ("compress_pdf", "compress_to_size"),
    ("resize_image_task", "resize_image"),
];

/// Parameter defaults that come from configuration rather than code.
#[derive(Debug, Clone)]
pub struct OperationDefaults {
    pub target_size: String,
}

impl Default for OperationDefaults {
    fn default() -> Self {
        Self {
            target_size: "1MB".to_string(),
        }
    }
}

/// Name → operation mapping plus the shared validation rules.
pub struct OperationRegistry {
    operations: BTreeMap<&'static str, Arc<dyn Operation>>,
    defaults: OperationDefaults,
    max_input_files: usize,
}

impl OperationRegistry {
    /// An empty registry. Use [`standard`](Self::standard) for the full catalogue.
    pub fn empty(defaults: OperationDefaults, max_input_files: usize) -> Self {
        Self {
            operations: BTreeMap::new(),
            defaults,
            max_input_files,
        }
    }

    /// Every built-in operation.
    pub fn standard(defaults: OperationDefaults, max_input_files: usize) -> Self {
        let mut registry = Self::empty(defaults, max_input_files)
            .with(Arc::new(ConvertAndCompressToPdf::new()))
            .with(Arc::new(ParallelPairOperation::new()))
            .with(Arc::new(ImagesToPdf::new()))
            .with(Arc::new(CompressToSize::new()))
            .with(Arc::new(ConvertImageFormat::new()))
            .with(Arc::new(ResizeImage::new()));
        for conversion in DocumentConversion::catalogue() {
            registry = registry.with(Arc::new(conversion));
        }
        registry
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::standard(
            OperationDefaults {
                target_size: config.default_target_size.clone(),
            },
            config.max_input_files,
        )
    }

    /// Add (or replace) an operation. Only meaningful while building.
    pub fn with(mut self, operation: Arc<dyn Operation>) -> Self {
        self.operations.insert(operation.descriptor().name, operation);
        self
    }

    /// Resolve legacy aliases to the canonical name.
    pub fn canonical_name<'a>(&self, name: &'a str) -> &'a str {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(name)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Operation>, PipelineError> {
        self.operations
            .get(self.canonical_name(name))
            .cloned()
            .ok_or_else(|| PipelineError::UnknownOperation {
                name: name.to_string(),
            })
    }

    /// Check `inputs` and `params` against `operation`, substituting defaults.
    pub fn validate(
        &self,
        operation: &dyn Operation,
        inputs: &[FileReference],
        params: &mut Params,
    ) -> Result<(), PipelineError> {
        let d = operation.descriptor();

        if inputs.len() > self.max_input_files {
            return Err(PipelineError::validation(
                d.name,
                format!(
                    "too many files: {} given, maximum allowed is {}",
                    inputs.len(),
                    self.max_input_files
                ),
            ));
        }
        let too_few = inputs.len() < d.min_inputs;
        let too_many = d.max_inputs.is_some_and(|max| inputs.len() > max);
        if too_few || too_many {
            return Err(PipelineError::validation(
                d.name,
                format!("expects {} input file(s), got {}", d.arity(), inputs.len()),
            ));
        }
        for input in inputs {
            let ext = input.extension();
            if !d.accepts_extension(&ext) {
                return Err(PipelineError::validation(
                    d.name,
                    format!(
                        "unsupported file type '{}' for {} (accepted: {})",
                        input.file_name(),
                        d.name,
                        d.accepted_extensions.join(", ")
                    ),
                ));
            }
        }

        operation.prepare(inputs, params, &self.defaults)
    }

    /// Descriptors of every registered operation, sorted by name.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.operations.values().map(|op| op.descriptor())
    }

    pub fn defaults(&self) -> &OperationDefaults {
        &self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileRole;

    fn registry() -> OperationRegistry {
        OperationRegistry::standard(OperationDefaults::default(), 3)
    }

    fn inputs(names: &[&str]) -> Vec<FileReference> {
        names
            .iter()
            .map(|n| FileReference::new(format!("/tmp/{n}"), FileRole::Input))
            .collect()
    }

    #[test]
    fn catalogue_is_complete() {
        let r = registry();
        let names: Vec<_> = r.descriptors().map(|d| d.name).collect();
        for expected in [
            "convert_and_compress_to_pdf",
            "parallel_pair_operation",
            "images_to_pdf",
            "compress_to_size",
            "word_to_pdf",
            "pdf_to_word",
            "ppt_to_pdf",
            "excel_to_pdf",
            "pdf_to_excel",
            "pdf_to_ppt",
            "convert_image_format",
            "resize_image",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn aliases_resolve() {
        let r = registry();
        assert_eq!(r.lookup("compress_pdf").unwrap().descriptor().name, "compress_to_size");
        assert_eq!(
            r.lookup("convert_parallel_operations").unwrap().descriptor().name,
            "parallel_pair_operation"
        );
    }

    #[test]
    fn unknown_operation_is_validation_error() {
        let err = registry().lookup("teleport").err().unwrap();
        assert!(matches!(err, PipelineError::UnknownOperation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn arity_is_enforced() {
        let r = registry();
        let op = r.lookup("parallel_pair_operation").unwrap();
        let err = r
            .validate(op.as_ref(), &inputs(&["a.png"]), &mut Params::default())
            .unwrap_err();
        assert!(err.to_string().contains("expects 2"), "got: {err}");
    }

    #[test]
    fn max_input_files_guard() {
        let r = registry();
        let op = r.lookup("images_to_pdf").unwrap();
        let err = r
            .validate(
                op.as_ref(),
                &inputs(&["1.png", "2.png", "3.png", "4.png"]),
                &mut Params::default(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("too many files"), "got: {err}");
    }

    #[test]
    fn extension_is_enforced() {
        let r = registry();
        let op = r.lookup("word_to_pdf").unwrap();
        let err = r
            .validate(op.as_ref(), &inputs(&["slides.pptx"]), &mut Params::default())
            .unwrap_err();
        assert!(err.to_string().contains("unsupported file type"), "got: {err}");
        r.validate(op.as_ref(), &inputs(&["Report.DOCX"]), &mut Params::default())
            .unwrap();
    }

    #[test]
    fn defaults_are_substituted() {
        let r = registry();
        let op = r.lookup("compress_to_size").unwrap();
        let mut params = Params::default();
        r.validate(op.as_ref(), &inputs(&["a.pdf"]), &mut params).unwrap();
        assert_eq!(params.get("size"), Some("1MB"));
    }
}
