pub mod border;
pub mod color;
pub mod orchestrator;
pub mod resolution;
pub mod upscale;

pub use border::{BorderDetector, CropDecision, CropRect, NoCropReason};
pub use color::{
    apply_orientation, detect_color_mode, is_rgba, normalize_color, read_exif_orientation,
    sniff_color_mode,
};
pub use orchestrator::{
    load_source, ImageProcessingPipeline, LoadedSource, ProcessedImage, ProcessingMetadata,
    ProcessingOutcome, SkipReason,
};
pub use resolution::{plan_resolution, PlanSource, ResolutionPlan, ResolutionPlanner, SizeRounding};
pub use upscale::{ResampleUpscaler, UpscaleError, Upscaler, UpscalerRegistry};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to read image: {0}")]
    ImageRead(#[from] std::io::Error),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Planned size {width}x{height} is out of bounds")]
    SizeOutOfBounds { width: u32, height: u32 },

    #[error("Crop detection failed: {0}")]
    CropDetection(String),

    #[error("Processing panicked: {0}")]
    Panicked(String),
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic without message".into()
    }
}
