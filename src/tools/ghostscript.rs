use super::{run_tool, Compressor};
use crate::compress::QualityFactor;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const TOOL: &str = "ghostscript";

/// PDF compressor backed by the Ghostscript `pdfwrite` device.
///
/// Images are downsampled to 72 dpi; the quality factor drives the JPEG
/// quantisation (`-dQFactor`) and the colour/grey image quality.
#[derive(Debug, Clone)]
pub struct Ghostscript {
    binary: PathBuf,
}

impl Ghostscript {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    fn command(&self, input: &Path, output: &Path, quality: QualityFactor) -> Command {
        let percent = quality.percent();
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-sDEVICE=pdfwrite",
            "-dCompatibilityLevel=1.4",
            "-dPDFSETTINGS=/screen",
            "-dColorImageDownsampleType=/Bicubic",
            "-dColorImageResolution=72",
            "-dGrayImageDownsampleType=/Bicubic",
            "-dGrayImageResolution=72",
            "-dMonoImageDownsampleType=/Subsample",
            "-dMonoImageResolution=72",
            "-dDownsampleColorImages=true",
            "-dDownsampleGrayImages=true",
            "-dDownsampleMonoImages=true",
            "-dDetectDuplicateImages=true",
            "-dAutoFilterColorImages=false",
            "-dAutoFilterGrayImages=false",
        ])
        .arg(format!("-dQFactor={}", quality.as_f32()))
        .arg(format!("-dColorImageQuality={percent}"))
        .arg(format!("-dGrayImageQuality={percent}"))
        .args(["-dNOPAUSE", "-dQUIET", "-dBATCH"]);

        let mut out_arg = OsString::from("-sOutputFile=");
        out_arg.push(output);
        cmd.arg(out_arg).arg(input);
        cmd
    }
}

#[async_trait]
impl Compressor for Ghostscript {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        quality: QualityFactor,
    ) -> Result<(), PipelineError> {
        run_tool(TOOL, self.command(input, output, quality)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(gs: &Ghostscript, q: QualityFactor) -> Vec<String> {
        gs.command(Path::new("in.pdf"), Path::new("out.pdf"), q)
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn quality_flows_into_arguments() {
        let gs = Ghostscript::new("gs");
        let a = args(&gs, QualityFactor::START);
        assert!(a.contains(&"-dQFactor=0.9".to_string()), "{a:?}");
        assert!(a.contains(&"-dColorImageQuality=90".to_string()));
        assert!(a.contains(&"-dGrayImageQuality=90".to_string()));

        let a = args(&gs, QualityFactor::FLOOR);
        assert!(a.contains(&"-dColorImageQuality=10".to_string()));
    }

    #[test]
    fn output_then_input_last() {
        let a = args(&Ghostscript::new("gs"), QualityFactor::START);
        assert_eq!(a[a.len() - 2], "-sOutputFile=out.pdf");
        assert_eq!(a[a.len() - 1], "in.pdf");
        assert!(a.contains(&"-sDEVICE=pdfwrite".to_string()));
    }
}
