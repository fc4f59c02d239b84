//! Region detection and text recognition capabilities.
//!
//! The learned detector and the OCR engine are external; this module fixes
//! their contracts and the data they exchange with the pipeline.

mod device;

pub use device::{ComputeDevice, DeviceLease};

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::error::OcrError;
use crate::models::schema::{DetectionClass, Language};

/// Axis-aligned rectangle in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a region from corner coordinates `(x1, y1, x2, y2)`.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        let left = left.max(0.0);
        let top = top.max(0.0);
        Self {
            x: left as u32,
            y: top as u32,
            width: (right - left).max(0.0).round() as u32,
            height: (bottom - top).max(0.0).round() as u32,
        }
    }

    /// Clip to image bounds; `None` when nothing of the region remains.
    pub fn clip(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Region::new(self.x, self.y, w, h))
    }
}

/// One raw detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: DetectionClass,
    pub region: Region,
    /// Confidence score (0.0 - 1.0).
    pub confidence: f32,
}

impl Detection {
    /// Create a detection; the confidence is clamped into `[0, 1]`.
    pub fn new(class: DetectionClass, region: Region, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self {
            class,
            region,
            confidence,
        }
    }
}

/// A detected region cut out of the page.
#[derive(Debug, Clone)]
pub struct RegionCrop {
    /// The region in page coordinates (after clipping).
    pub region: Region,
    pub image: DynamicImage,
}

impl RegionCrop {
    /// Crop `region` from `page`, clipping it to the page bounds.
    pub fn from_page(page: &DynamicImage, region: Region) -> Result<Self, OcrError> {
        let (width, height) = page.dimensions();
        let clipped = region.clip(width, height).ok_or_else(|| {
            OcrError::InvalidImage(format!(
                "region {:?} lies outside the {}x{} page",
                region, width, height
            ))
        })?;
        Ok(Self {
            region: clipped,
            image: page.crop_imm(clipped.x, clipped.y, clipped.width, clipped.height),
        })
    }
}

/// Region detector: page image → classified regions.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, page: &DynamicImage) -> Result<Vec<Detection>, OcrError>;
}

/// Text recognizer: region image + languages → raw text.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, crop: &RegionCrop, languages: &[Language]) -> Result<String, OcrError>;
}
