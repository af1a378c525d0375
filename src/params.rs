//! Parameter grammar shared by the operations.
//!
//! Requests arrive as loose strings picked out of a chat message ("500kb",
//! "800x600", "4:3", "png"). Everything here turns those strings into typed
//! values, or `None` when they don't parse. Callers decide whether a `None`
//! is a validation error or a fallback to a default.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static RE_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+\.?\d*)(kb|mb)").expect("size regex is valid"));
static RE_RESOLUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*[xX]\s*(\d+)").expect("resolution regex is valid"));
static RE_ASPECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d+)").expect("aspect regex is valid"));

/// Parse a human size like `"1MB"`, `"500 kb"` or `"1.5mb"` into bytes.
///
/// Units are binary: `kb` = 1024, `mb` = 1024².
pub fn parse_size_to_bytes(input: &str) -> Option<u64> {
    let normalised: String = input
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let caps = RE_SIZE.captures(&normalised)?;
    let value: f64 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "kb" => 1024.0,
        _ => 1024.0 * 1024.0,
    };
    let bytes = (value * unit) as u64;
    (bytes > 0).then_some(bytes)
}

/// Parse `"800x600"` into `(800, 600)`.
pub fn parse_resolution(input: &str) -> Option<(u32, u32)> {
    let caps = RE_RESOLUTION.captures(input.trim())?;
    let w: u32 = caps[1].parse().ok()?;
    let h: u32 = caps[2].parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Parse `"4:3"` into `(4, 3)`.
pub fn parse_aspect_ratio(input: &str) -> Option<(u32, u32)> {
    let caps = RE_ASPECT.captures(input.trim())?;
    let w: u32 = caps[1].parse().ok()?;
    let h: u32 = caps[2].parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Parse a boolean flag the way request parameters spell it.
pub fn parse_flag(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Image formats the image operations can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetImageFormat {
    Png,
    Jpeg,
    /// JPEG, but written with a `.jpg` extension.
    Jpg,
    Bmp,
    Gif,
}

impl TargetImageFormat {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "PNG" => Some(Self::Png),
            "JPEG" => Some(Self::Jpeg),
            "JPG" => Some(Self::Jpg),
            "BMP" => Some(Self::Bmp),
            "GIF" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Jpg => "jpg",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg | Self::Jpg => image::ImageFormat::Jpeg,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Gif => image::ImageFormat::Gif,
        }
    }
}

impl fmt::Display for TargetImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension().to_uppercase())
    }
}

/// How a resize request wants the image changed. Exactly one wins, in the
/// order size → width+height → resolution → aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSpec {
    /// Keep dimensions, re-encode towards a byte budget.
    TargetBytes(u64),
    /// Exact output dimensions.
    Dimensions(u32, u32),
    /// Crop-free reshape to a `w:h` ratio within the original bounds.
    Aspect(u32, u32),
}

impl ResizeSpec {
    /// Pick the resize mode from request parameters.
    pub fn from_params(params: &crate::job::Params) -> Option<Self> {
        if let Some(size) = params.get("size") {
            return parse_size_to_bytes(size).map(Self::TargetBytes);
        }
        if let (Some(w), Some(h)) = (params.get("width"), params.get("height")) {
            let w: u32 = w.trim().parse().ok()?;
            let h: u32 = h.trim().parse().ok()?;
            return (w > 0 && h > 0).then_some(Self::Dimensions(w, h));
        }
        if let Some(res) = params.get("resolution") {
            return parse_resolution(res).map(|(w, h)| Self::Dimensions(w, h));
        }
        if let Some(aspect) = params.get("aspect") {
            return parse_aspect_ratio(aspect).map(|(w, h)| Self::Aspect(w, h));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Params;

    #[test]
    fn size_units_are_binary() {
        assert_eq!(parse_size_to_bytes("1MB"), Some(1024 * 1024));
        assert_eq!(parse_size_to_bytes("500kb"), Some(512_000));
        assert_eq!(parse_size_to_bytes("500 KB"), Some(512_000));
        assert_eq!(parse_size_to_bytes("1.5mb"), Some(1_572_864));
    }

    #[test]
    fn size_rejects_garbage() {
        assert_eq!(parse_size_to_bytes("big"), None);
        assert_eq!(parse_size_to_bytes("10gb"), None);
        assert_eq!(parse_size_to_bytes(""), None);
        assert_eq!(parse_size_to_bytes("0kb"), None);
    }

    #[test]
    fn resolution_and_aspect() {
        assert_eq!(parse_resolution("800x600"), Some((800, 600)));
        assert_eq!(parse_resolution("1920 X 1080"), Some((1920, 1080)));
        assert_eq!(parse_resolution("800"), None);
        assert_eq!(parse_aspect_ratio("4:3"), Some((4, 3)));
        assert_eq!(parse_aspect_ratio("0:3"), None);
    }

    #[test]
    fn image_formats() {
        assert_eq!(TargetImageFormat::parse("png"), Some(TargetImageFormat::Png));
        assert_eq!(TargetImageFormat::parse("Jpg").unwrap().extension(), "jpg");
        assert_eq!(TargetImageFormat::parse("tiff"), None);
        assert_eq!(TargetImageFormat::Jpeg.to_string(), "JPEG");
    }

    #[test]
    fn resize_spec_precedence() {
        let mut p = Params::default();
        p.insert("aspect", "16:9");
        p.insert("width", "100");
        p.insert("height", "50");
        assert_eq!(ResizeSpec::from_params(&p), Some(ResizeSpec::Dimensions(100, 50)));

        p.insert("size", "200kb");
        assert_eq!(ResizeSpec::from_params(&p), Some(ResizeSpec::TargetBytes(204_800)));

        let mut q = Params::default();
        q.insert("aspect", "16:9");
        assert_eq!(ResizeSpec::from_params(&q), Some(ResizeSpec::Aspect(16, 9)));
        assert_eq!(ResizeSpec::from_params(&Params::default()), None);
    }

    #[test]
    fn flags() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" YES "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
