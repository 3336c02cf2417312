use crate::config::ImageFormat;
use crate::request::Modifiers;
use crate::{ImageKitError, Result};
use std::fmt;
use std::str::FromStr;

/// Fit modes for image transformation
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FitMode {
    /// Crop to fill the box exactly.
    Cover,
    /// Scale to fit inside the box, keeping aspect ratio.
    Contain,
    /// Stretch to the box, ignoring aspect ratio.
    Fill,
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMode::Cover => write!(f, "cover"),
            FitMode::Contain => write!(f, "contain"),
            FitMode::Fill => write!(f, "fill"),
        }
    }
}

impl FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cover" => Ok(FitMode::Cover),
            "contain" | "inside" => Ok(FitMode::Contain),
            "fill" => Ok(FitMode::Fill),
            _ => Err(format!("Invalid fit mode: {}", s)),
        }
    }
}

/// Parameters for image transformation derived from request modifiers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
    /// Quality of the output image (1-100)
    pub quality: Option<u8>,
    pub fit_mode: Option<FitMode>,
}

fn pick<'a>(modifiers: &'a Modifiers, short: &str, long: &str) -> Option<&'a str> {
    modifiers
        .get(long)
        .or_else(|| modifiers.get(short))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn dimension(name: &str, raw: &str, max: u32) -> Result<u32> {
    match raw.parse::<u32>() {
        Ok(v) if v > max => Err(ImageKitError::InvalidArgument(format!(
            "{} {} exceeds the {}px limit",
            name, v, max
        ))),
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ImageKitError::InvalidArgument(format!("Invalid {}: {}", name, raw))),
    }
}

impl TransformParams {
    /// Interprets the modifiers the bundled engine understands. Unknown
    /// modifiers are ignored. Widths and heights above `max_dimension` are
    /// rejected.
    pub fn from_modifiers(modifiers: &Modifiers, max_dimension: u32) -> Result<Self> {
        let mut params = TransformParams::default();

        if let Some(size) = pick(modifiers, "s", "resize") {
            let (w, h) = size.split_once('x').unwrap_or((size, ""));
            if !w.is_empty() { params.width = Some(dimension("width", w, max_dimension)?); }
            if !h.is_empty() { params.height = Some(dimension("height", h, max_dimension)?); }
        }
        if let Some(w) = pick(modifiers, "w", "width") {
            params.width = Some(dimension("width", w, max_dimension)?);
        }
        if let Some(h) = pick(modifiers, "h", "height") {
            params.height = Some(dimension("height", h, max_dimension)?);
        }

        if let Some(q) = pick(modifiers, "q", "quality") {
            params.quality = match q.parse::<u8>() {
                Ok(v) if (1..=100).contains(&v) => Some(v),
                _ => return Err(ImageKitError::InvalidArgument(format!("Invalid quality: {}", q))),
            };
        }

        if let Some(fit) = modifiers.get("fit").filter(|v| !v.is_empty()) {
            params.fit_mode = Some(fit.parse().map_err(ImageKitError::InvalidArgument)?);
        }

        if let Some(f) = pick(modifiers, "f", "format") {
            params.format = Some(
                f.parse::<ImageFormat>()
                    .map_err(|_| ImageKitError::UnsupportedFormat(f.to_string()))?,
            );
        }

        Ok(params)
    }
}
