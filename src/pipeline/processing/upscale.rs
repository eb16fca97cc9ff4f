//! Upscaler seam.
//!
//! The pipeline only sees `Upscaler` by name through `UpscalerRegistry`.
//! Model runtimes plug in by implementing the trait; `ResampleUpscaler` is the
//! built-in resampling fallback.

use std::collections::HashMap;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use thiserror::Error;

use super::color::is_rgba;
use crate::config::MAX_OUTPUT_DIMENSION;

#[derive(Error, Debug)]
pub enum UpscaleError {
    #[error("Unknown upscaler model: {0}")]
    UnknownModel(String),

    #[error("Upscaler {0} does not accept images with an alpha channel")]
    AlphaUnsupported(String),

    #[error("Upscaler {model} failed: {reason}")]
    Failed { model: String, reason: String },
}

/// A named image upscaler. Potentially slow, potentially failing.
pub trait Upscaler: Send + Sync {
    fn name(&self) -> &str;

    /// Upscale `image`. `scale` of `None` uses the model's native factor.
    fn upscale(&self, image: &DynamicImage, scale: Option<f32>) -> Result<DynamicImage, UpscaleError>;
}

/// Lanczos3 resampling by a fixed native factor.
pub struct ResampleUpscaler {
    name: String,
    factor: f32,
}

impl ResampleUpscaler {
    pub fn new(name: impl Into<String>, factor: f32) -> Self {
        Self {
            name: name.into(),
            factor,
        }
    }
}

impl Upscaler for ResampleUpscaler {
    fn name(&self) -> &str {
        &self.name
    }

    fn upscale(&self, image: &DynamicImage, scale: Option<f32>) -> Result<DynamicImage, UpscaleError> {
        let factor = scale.unwrap_or(self.factor);
        let fail = |reason: String| UpscaleError::Failed {
            model: self.name.clone(),
            reason,
        };
        if !factor.is_finite() || factor < 1.0 {
            return Err(fail(format!("scale {factor} is not an enlargement")));
        }

        let (w, h) = image.dimensions();
        let new_w = (w as f32 * factor).round() as u32;
        let new_h = (h as f32 * factor).round() as u32;
        if new_w == 0 || new_h == 0 || new_w > MAX_OUTPUT_DIMENSION * 2 || new_h > MAX_OUTPUT_DIMENSION * 2 {
            return Err(fail(format!("{w}x{h} x{factor} gives {new_w}x{new_h}")));
        }

        Ok(image.resize_exact(new_w, new_h, FilterType::Lanczos3))
    }
}

/// Upscalers by model name.
#[derive(Default)]
pub struct UpscalerRegistry {
    models: HashMap<String, Box<dyn Upscaler>>,
}

impl UpscalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `lanczos-2x` and `lanczos-4x`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ResampleUpscaler::new("lanczos-2x", 2.0)));
        registry.register(Box::new(ResampleUpscaler::new("lanczos-4x", 4.0)));
        registry
    }

    /// Add or replace an upscaler under its own name.
    pub fn register(&mut self, upscaler: Box<dyn Upscaler>) {
        self.models.insert(upscaler.name().to_string(), upscaler);
    }

    pub fn get(&self, model_name: &str) -> Option<&dyn Upscaler> {
        self.models.get(model_name).map(|u| u.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run `model_name` over `image`. RGBA input is refused.
    pub fn upscale(
        &self,
        image: &DynamicImage,
        model_name: &str,
        scale: Option<f32>,
    ) -> Result<DynamicImage, UpscaleError> {
        if is_rgba(image) {
            return Err(UpscaleError::AlphaUnsupported(model_name.to_string()));
        }
        let upscaler = self
            .get(model_name)
            .ok_or_else(|| UpscaleError::UnknownModel(model_name.to_string()))?;
        upscaler.upscale(image, scale)
    }
}
