//! Image processing orchestrator.
//!
//! Pipeline flow for one source image:
//! 1. `detector.crop()` removes letterbox borders (fail-open to the full frame)
//! 2. `normalize_color()` brings the buffer to RGB or RGBA
//! 3. upscale through the registry when the long edge is below the target
//!    (skipped for RGBA, fail-open on upscaler errors)
//! 4. `planner.plan()` + Lanczos3 resize
//!
//! Every failure inside the pipeline becomes `ProcessingOutcome::Skipped`;
//! callers never see a `ProcessingError`.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::border::{BorderDetector, CropDecision};
use super::color::{apply_orientation, detect_color_mode, is_rgba, normalize_color, read_exif_orientation};
use super::resolution::{ResolutionPlan, ResolutionPlanner};
use super::upscale::{Upscaler, UpscalerRegistry};
use super::{panic_message, ProcessingError};
use crate::config::IngestConfig;
use crate::models::ColorMode;

// ═══════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════

/// What happened to a processed image besides crop and resize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingMetadata {
    pub was_upscaled: bool,
    pub upscaler_used: Option<String>,
}

/// A derived buffer ready for the content store.
#[derive(Debug)]
pub struct ProcessedImage {
    pub image: DynamicImage,
    pub metadata: ProcessingMetadata,
    pub crop: CropDecision,
    pub plan: ResolutionPlan,
}

impl ProcessedImage {
    pub fn has_alpha(&self) -> bool {
        is_rgba(&self.image)
    }
}

/// Why no derived image was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Still below the target after any upscaling.
    TooSmall { width: u32, height: u32, target: u32 },
    InvalidDimensions(String),
    SizeOutOfBounds { width: u32, height: u32 },
    /// Read, decode or encode failure.
    Failed(String),
}

impl From<ProcessingError> for SkipReason {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::InvalidDimensions(msg) => Self::InvalidDimensions(msg),
            ProcessingError::SizeOutOfBounds { width, height } => Self::SizeOutOfBounds { width, height },
            other => Self::Failed(other.to_string()),
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSmall { width, height, target } => {
                write!(f, "{width}x{height} is below target resolution {target}")
            }
            Self::InvalidDimensions(msg) => write!(f, "invalid dimensions: {msg}"),
            Self::SizeOutOfBounds { width, height } => {
                write!(f, "planned size {width}x{height} is out of bounds")
            }
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

/// Result of one processing call. `Skipped` means "do not fail the batch".
#[derive(Debug)]
pub enum ProcessingOutcome {
    Processed(ProcessedImage),
    Skipped(SkipReason),
}

impl ProcessingOutcome {
    pub fn processed(self) -> Option<ProcessedImage> {
        match self {
            Self::Processed(p) => Some(p),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// A decoded, orientation-corrected source with the mode its file declared.
pub struct LoadedSource {
    pub image: DynamicImage,
    pub mode: ColorMode,
    pub has_alpha: bool,
}

/// Read, decode and orient an image file.
pub fn load_source(path: &Path) -> Result<LoadedSource, ProcessingError> {
    let bytes = std::fs::read(path)?;
    let decoded =
        image::load_from_memory(&bytes).map_err(|e| ProcessingError::ImageDecode(e.to_string()))?;
    let (mode, has_alpha) = detect_color_mode(&bytes, &decoded);
    let image = apply_orientation(decoded, read_exif_orientation(&bytes));
    Ok(LoadedSource {
        image,
        mode,
        has_alpha,
    })
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

/// Crop → colour → upscale → resize, with injected collaborators.
pub struct ImageProcessingPipeline {
    detector: BorderDetector,
    planner: ResolutionPlanner,
    upscalers: UpscalerRegistry,
}

impl ImageProcessingPipeline {
    pub fn new(detector: BorderDetector, planner: ResolutionPlanner, upscalers: UpscalerRegistry) -> Self {
        Self {
            detector,
            planner,
            upscalers,
        }
    }

    /// Default detector, configured planner, built-in upscalers.
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            BorderDetector::default(),
            ResolutionPlanner::new(config.preferred_resolutions.clone(), config.size_rounding),
            UpscalerRegistry::with_builtin(),
        )
    }

    /// Register an additional upscaler (e.g. a model runtime).
    pub fn with_upscaler(mut self, upscaler: Box<dyn Upscaler>) -> Self {
        self.upscalers.register(upscaler);
        self
    }

    pub fn upscalers(&self) -> &UpscalerRegistry {
        &self.upscalers
    }

    /// Process an in-memory buffer.
    pub fn process(
        &self,
        image: DynamicImage,
        original_has_alpha: bool,
        original_mode: ColorMode,
        target_resolution: u32,
        upscaler: Option<&str>,
    ) -> ProcessingOutcome {
        match self.run_guarded(image, original_has_alpha, original_mode, target_resolution, upscaler) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, target_resolution, "Image processing failed, skipping");
                ProcessingOutcome::Skipped(e.into())
            }
        }
    }

    /// Load `path` and process it. Failures are logged with the path.
    pub fn process_file(&self, path: &Path, target_resolution: u32, upscaler: Option<&str>) -> ProcessingOutcome {
        let source = match load_source(path) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open image for processing, skipping");
                return ProcessingOutcome::Skipped(e.into());
            }
        };

        match self.run_guarded(source.image, source.has_alpha, source.mode, target_resolution, upscaler) {
            Ok(outcome) => {
                if let ProcessingOutcome::Skipped(reason) = &outcome {
                    info!(path = %path.display(), %reason, "No derived image produced");
                }
                outcome
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, target_resolution, "Image processing failed, skipping");
                ProcessingOutcome::Skipped(e.into())
            }
        }
    }

    /// `run` with panics from crop, upscaler plugins or resize turned into errors.
    fn run_guarded(
        &self,
        image: DynamicImage,
        original_has_alpha: bool,
        original_mode: ColorMode,
        target_resolution: u32,
        upscaler: Option<&str>,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            self.run(image, original_has_alpha, original_mode, target_resolution, upscaler)
        }))
        .unwrap_or_else(|payload| Err(ProcessingError::Panicked(panic_message(payload.as_ref()))))
    }

    fn run(
        &self,
        image: DynamicImage,
        original_has_alpha: bool,
        original_mode: ColorMode,
        target_resolution: u32,
        upscaler: Option<&str>,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 || target_resolution == 0 {
            return Err(ProcessingError::InvalidDimensions(format!(
                "{orig_w}x{orig_h} at target {target_resolution}"
            )));
        }

        // 1. Border crop
        let (image, crop) = self.detector.crop(image);

        // 2. Colour normalisation
        let mut image = normalize_color(image, original_mode, original_has_alpha);

        // 3. Upscale when the long edge is short
        let mut metadata = ProcessingMetadata::default();
        let (w, h) = image.dimensions();
        if w.max(h) < target_resolution {
            if let Some(model) = upscaler {
                if is_rgba(&image) {
                    info!(model, "Alpha channel present, not upscaling");
                } else {
                    match self.upscalers.upscale(&image, model, None) {
                        Ok(upscaled) => {
                            debug!(model, from = format!("{w}x{h}"), to = format!("{}x{}", upscaled.width(), upscaled.height()), "Upscaled");
                            image = upscaled;
                            metadata.was_upscaled = true;
                            metadata.upscaler_used = Some(model.to_string());
                        }
                        Err(e) => warn!(model, error = %e, "Upscale failed, continuing without it"),
                    }
                }
            }
        }

        let (w, h) = image.dimensions();
        if w.max(h) < target_resolution {
            return Ok(ProcessingOutcome::Skipped(SkipReason::TooSmall {
                width: w,
                height: h,
                target: target_resolution,
            }));
        }

        // 4. Plan + resize
        let plan = self.planner.plan(w, h, target_resolution)?;
        let image = if (w, h) == plan.dimensions() {
            image
        } else {
            image.resize_exact(plan.width, plan.height, FilterType::Lanczos3)
        };

        debug!(
            original = format!("{orig_w}x{orig_h}"),
            cropped = crop.rect().is_some(),
            output = format!("{}x{}", plan.width, plan.height),
            upscaled = metadata.was_upscaled,
            "Image processed"
        );

        Ok(ProcessingOutcome::Processed(ProcessedImage {
            image,
            metadata,
            crop,
            plan,
        }))
    }
}
