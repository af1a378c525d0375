//! In-process image work: resize, re-encode, and HTML page assembly.
//!
//! Decoding and encoding are CPU-bound, so every public entry point hops onto
//! the blocking pool via `spawn_blocking` and keeps the async workers free.

use crate::error::PipelineError;
use crate::job::{extension_of, media_type_for};
use crate::params::{ResizeSpec, TargetImageFormat};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Quality used when a resize does not target a byte size.
const DEFAULT_JPEG_QUALITY: u8 = 95;
const MIN_JPEG_QUALITY: u8 = 10;

// ── Public async API ─────────────────────────────────────────────────────

/// Resize `input` into `output` following `spec`. The output format follows
/// the output path's extension.
pub async fn resize(input: &Path, output: &Path, spec: ResizeSpec) -> Result<(), PipelineError> {
    let (input, output) = (input.to_path_buf(), output.to_path_buf());
    blocking(move || resize_blocking(&input, &output, spec)).await
}

/// Re-encode `input` as `format` into `output`.
pub async fn convert_format(
    input: &Path,
    output: &Path,
    format: TargetImageFormat,
) -> Result<(), PipelineError> {
    let (input, output) = (input.to_path_buf(), output.to_path_buf());
    blocking(move || {
        let img = decode(&input)?;
        encode(&img, &output, format.image_format(), DEFAULT_JPEG_QUALITY)
    })
    .await
}

/// Build an HTML document with one image per page, images inlined as base64
/// data URIs so the renderer needs no local file access.
pub async fn images_page_html(images: &[PathBuf]) -> Result<String, PipelineError> {
    let images = images.to_vec();
    blocking(move || {
        let mut html = String::from("<html><body>");
        for path in &images {
            let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
            let b64 = STANDARD.encode(&bytes);
            debug!("Inlined {} → {} bytes base64", path.display(), b64.len());
            html.push_str(&format!(
                r#"<img src="data:{};base64,{}" style="max-width: 100%; page-break-after: always;"><br>"#,
                media_type_for(path),
                b64
            ));
        }
        html.push_str("</body></html>");
        Ok(html)
    })
    .await
}

/// Whether the extension names an image format this crate can decode.
pub fn is_image_extension(ext: &str) -> bool {
    matches!(ext, "png" | "jpg" | "jpeg" | "bmp" | "gif")
}

// ── Pure geometry ────────────────────────────────────────────────────────

/// JPEG quality aimed at shrinking a `current`-byte file to `target` bytes.
pub fn quality_for_target(target: u64, current: u64) -> u8 {
    if current == 0 {
        return DEFAULT_JPEG_QUALITY;
    }
    let q = (f64::from(DEFAULT_JPEG_QUALITY) * target as f64 / current as f64) as i64;
    q.clamp(i64::from(MIN_JPEG_QUALITY), i64::from(DEFAULT_JPEG_QUALITY)) as u8
}

/// Dimensions for reshaping `(width, height)` to an `aw:ah` ratio without
/// growing past the original height.
pub fn aspect_dimensions(width: u32, height: u32, aw: u32, ah: u32) -> (u32, u32) {
    let ratio = f64::from(aw) / f64::from(ah);
    let mut new_h = (f64::from(width) / ratio) as u32;
    let new_w;
    if new_h > height {
        new_h = height;
        new_w = (f64::from(height) * ratio) as u32;
    } else {
        new_w = (f64::from(new_h) * ratio) as u32;
    }
    (new_w.max(1), new_h.max(1))
}

// ── Blocking internals ───────────────────────────────────────────────────

async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Internal(format!("image task panicked: {e}")))?
}

fn image_error(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Image {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

fn decode(path: &Path) -> Result<DynamicImage, PipelineError> {
    ImageReader::open(path)
        .map_err(|e| PipelineError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| PipelineError::io(path, e))?
        .decode()
        .map_err(|e| image_error(path, e))
}

fn format_for_path(path: &Path) -> Result<ImageFormat, PipelineError> {
    let ext = extension_of(path);
    TargetImageFormat::parse(&ext)
        .map(|f| f.image_format())
        .ok_or_else(|| image_error(path, format!("unsupported output extension '{ext}'")))
}

fn encode(img: &DynamicImage, output: &Path, format: ImageFormat, quality: u8) -> Result<(), PipelineError> {
    let file = File::create(output).map_err(|e| PipelineError::io(output, e))?;
    let mut writer = BufWriter::new(file);
    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| image_error(output, e))?;
        }
        ImageFormat::Png => img
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| image_error(output, e))?,
        other => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut writer, other)
            .map_err(|e| image_error(output, e))?,
    }
    std::io::Write::flush(&mut writer).map_err(|e| PipelineError::io(output, e))?;
    Ok(())
}

fn resize_blocking(input: &Path, output: &Path, spec: ResizeSpec) -> Result<(), PipelineError> {
    let img = decode(input)?;
    let format = format_for_path(output)?;
    let (w, h) = (img.width(), img.height());

    let (resized, quality) = match spec {
        ResizeSpec::TargetBytes(target) => {
            let current = std::fs::metadata(input)
                .map_err(|e| PipelineError::io(input, e))?
                .len();
            (img, quality_for_target(target, current))
        }
        ResizeSpec::Dimensions(nw, nh) => {
            (img.resize_exact(nw, nh, FilterType::Lanczos3), DEFAULT_JPEG_QUALITY)
        }
        ResizeSpec::Aspect(aw, ah) => {
            let (nw, nh) = aspect_dimensions(w, h, aw, ah);
            (img.resize_exact(nw, nh, FilterType::Lanczos3), DEFAULT_JPEG_QUALITY)
        }
    };

    debug!(
        "Resize {} ({}x{}) → {} ({}x{}, q={})",
        input.display(),
        w,
        h,
        output.display(),
        resized.width(),
        resized.height(),
        quality
    );
    encode(&resized, output, format, quality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn noisy_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let img = RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8, 200])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(quality_for_target(1_000, 1_000), 95);
        assert_eq!(quality_for_target(5_000, 1_000), 95);
        assert_eq!(quality_for_target(500, 1_000), 47);
        assert_eq!(quality_for_target(1, 1_000_000), 10);
        assert_eq!(quality_for_target(10, 0), 95);
    }

    #[test]
    fn aspect_fits_inside_original() {
        // 2:1 from a 1600x1200 frame: width-driven.
        assert_eq!(aspect_dimensions(1600, 1200, 2, 1), (1600, 800));
        // 1:2 from a 400x300 frame: height-capped.
        assert_eq!(aspect_dimensions(400, 300, 1, 2), (150, 300));
    }

    #[tokio::test]
    async fn resize_to_exact_dimensions() {
        let dir = TempDir::new().unwrap();
        let src = noisy_png(dir.path(), "in.png", 64, 48);
        let out = dir.path().join("out.png");
        resize(&src, &out, ResizeSpec::Dimensions(32, 20)).await.unwrap();
        let img = image::open(&out).unwrap();
        assert_eq!((img.width(), img.height()), (32, 20));
    }

    #[tokio::test]
    async fn resize_by_size_keeps_dimensions() {
        let dir = TempDir::new().unwrap();
        let src = noisy_png(dir.path(), "in.png", 120, 80);
        let out = dir.path().join("out.jpg");
        resize(&src, &out, ResizeSpec::TargetBytes(1_024)).await.unwrap();
        let img = image::open(&out).unwrap();
        assert_eq!((img.width(), img.height()), (120, 80));
    }

    #[tokio::test]
    async fn convert_to_jpeg_drops_alpha() {
        let dir = TempDir::new().unwrap();
        let src = noisy_png(dir.path(), "in.png", 16, 16);
        let out = dir.path().join("out.jpeg");
        convert_format(&src, &out, TargetImageFormat::Jpeg).await.unwrap();
        let img = image::open(&out).unwrap();
        assert!(!img.color().has_alpha());
    }

    #[tokio::test]
    async fn convert_to_gif_and_bmp() {
        let dir = TempDir::new().unwrap();
        let src = noisy_png(dir.path(), "in.png", 8, 8);
        for (fmt, name) in [(TargetImageFormat::Gif, "o.gif"), (TargetImageFormat::Bmp, "o.bmp")] {
            let out = dir.path().join(name);
            convert_format(&src, &out, fmt).await.unwrap();
            assert!(std::fs::metadata(&out).unwrap().len() > 0);
        }
    }

    #[tokio::test]
    async fn undecodable_input_is_an_image_error() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("fake.png");
        std::fs::write(&src, b"not an image").unwrap();
        let err = resize(&src, &dir.path().join("o.png"), ResizeSpec::Dimensions(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Image { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn html_inlines_every_image() {
        let dir = TempDir::new().unwrap();
        let a = noisy_png(dir.path(), "a.png", 4, 4);
        let b = noisy_png(dir.path(), "b.png", 4, 4);
        let html = images_page_html(&[a, b]).await.unwrap();
        assert_eq!(html.matches("data:image/png;base64,").count(), 2);
        assert!(html.contains("page-break-after: always"));
    }
}
