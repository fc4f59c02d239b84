//! Replay of recorded detector and recognizer output.
//!
//! Each input `<file>` is paired with `<file>.detections.json`, the detector
//! output recorded offline together with the recognized text of each region.
//! The loader registers the annotations under a fingerprint of the decoded
//! page; the detector takes them back from the page it is handed, one load
//! per detection, and the recognizer looks texts up by crop. Identical crops
//! share their recorded text.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use image::{DynamicImage, GenericImageView};
use serde::Deserialize;
use tracing::debug;

use invex_core::{
    Detection, DetectionClass, DocumentLoader, FileLoader, GroundTruth, Language, LoadError, OcrError, Region,
    RegionCrop, RegionDetector, SourceRef, TextRecognizer,
};

/// One recorded region.
#[derive(Debug, Clone, Deserialize)]
pub struct Annotation {
    pub class: DetectionClass,
    pub region: Region,
    pub confidence: f32,
    /// Recognized text; absent when recognition failed for the region.
    #[serde(default)]
    pub text: Option<String>,
}

pub fn annotation_path(source: &Path) -> PathBuf {
    sidecar(source, "detections.json")
}

pub fn truth_path(source: &Path) -> PathBuf {
    sidecar(source, "truth.json")
}

fn sidecar(source: &Path, suffix: &str) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Read `<file>.truth.json` when present.
pub fn load_ground_truth(source: &Path) -> anyhow::Result<Option<GroundTruth>> {
    let path = truth_path(source);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let truth = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid ground truth {}: {}", path.display(), e))?;
    Ok(Some(truth))
}

type CropKey = (u32, u32, u32, u32, u64);

/// Loader, detector and recognizer backed by recorded annotations.
#[derive(Debug, Default)]
pub struct ReplayEngine {
    files: FileLoader,
    /// Annotations per page fingerprint, in load order.
    pages: Mutex<HashMap<u64, VecDeque<Vec<Annotation>>>>,
    texts: Mutex<HashMap<CropKey, String>>,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest pending annotations registered for a page.
    fn take_annotations(&self, page: u64) -> Option<Vec<Annotation>> {
        let mut pages = lock(&self.pages);
        let pending = pages.get_mut(&page)?;
        let annotations = pending.pop_front();
        if pending.is_empty() {
            pages.remove(&page);
        }
        annotations
    }

    fn read_annotations(source: &SourceRef) -> Result<Vec<Annotation>, LoadError> {
        let path = annotation_path(source.as_path());
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.display().to_string()),
            _ => LoadError::Io(e),
        })?;
        serde_json::from_str(&content).map_err(|e| LoadError::Malformed(format!("{}: {}", path.display(), e)))
    }
}

impl DocumentLoader for ReplayEngine {
    fn load(&self, source: &SourceRef) -> Result<DynamicImage, LoadError> {
        let annotations = Self::read_annotations(source)?;
        let page = self.files.load(source)?;

        debug!(source = %source, regions = annotations.len(), "replay annotations loaded");
        lock(&self.pages)
            .entry(fingerprint(&page))
            .or_default()
            .push_back(annotations);
        Ok(page)
    }
}

impl RegionDetector for ReplayEngine {
    fn detect(&self, page: &DynamicImage) -> Result<Vec<Detection>, OcrError> {
        let annotations = self
            .take_annotations(fingerprint(page))
            .ok_or_else(|| OcrError::Detection("no recorded detections for this page".to_string()))?;

        let mut texts = lock(&self.texts);
        let mut detections = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            if let Some(text) = annotation.text {
                // Regions off the page are rejected by the pipeline itself.
                if let Ok(crop) = RegionCrop::from_page(page, annotation.region) {
                    texts.insert(crop_key(&crop), text);
                }
            }
            detections.push(Detection::new(annotation.class, annotation.region, annotation.confidence));
        }
        Ok(detections)
    }
}

impl TextRecognizer for ReplayEngine {
    fn recognize(&self, crop: &RegionCrop, _languages: &[Language]) -> Result<String, OcrError> {
        lock(&self.texts)
            .get(&crop_key(crop))
            .cloned()
            .ok_or_else(|| OcrError::Recognition(format!("no recorded text for region {:?}", crop.region)))
    }
}

fn fingerprint(image: &DynamicImage) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.dimensions().hash(&mut hasher);
    image.as_bytes().hash(&mut hasher);
    hasher.finish()
}

fn crop_key(crop: &RegionCrop) -> CropKey {
    let r = crop.region;
    (r.x, r.y, r.width, r.height, fingerprint(&crop.image))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
