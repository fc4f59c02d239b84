//! Resolving source references into page images.

mod pdf;

pub use pdf::first_page_image;

use std::io::ErrorKind;

use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::error::LoadError;
use crate::models::task::SourceRef;

/// File extensions the file loader accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp", "tiff", "tif", "bmp"];

/// Resolves a source reference into the page image to analyze.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, source: &SourceRef) -> Result<DynamicImage, LoadError>;
}

/// Loads images and scanned PDFs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }

    /// Whether a path has a supported extension.
    pub fn is_supported(path: &std::path::Path) -> bool {
        extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }
}

fn extension(path: &std::path::Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

impl DocumentLoader for FileLoader {
    fn load(&self, source: &SourceRef) -> Result<DynamicImage, LoadError> {
        let path = source.as_path();
        let extension = extension(path).unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(LoadError::Unsupported(format!("{source} (extension {extension:?})")));
        }

        let data = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LoadError::NotFound(source.to_string()),
            _ => LoadError::Io(e),
        })?;
        debug!(source = %source, bytes = data.len(), "loaded source");

        if extension == "pdf" {
            return first_page_image(&data);
        }

        let format = ImageFormat::from_extension(&extension)
            .ok_or_else(|| LoadError::Unsupported(source.to_string()))?;
        image::load_from_memory_with_format(&data, format).map_err(|e| LoadError::Malformed(format!("{source}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_supported_extensions() {
        assert!(FileLoader::is_supported(Path::new("scan.PNG")));
        assert!(FileLoader::is_supported(Path::new("invoice.pdf")));
        assert!(!FileLoader::is_supported(Path::new("notes.docx")));
        assert!(!FileLoader::is_supported(Path::new("README")));
    }

    #[test]
    fn test_load_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.png");
        DynamicImage::new_rgb8(8, 4).save(&path).unwrap();

        let image = FileLoader::new().load(&SourceRef::from(path.as_path())).unwrap();
        assert_eq!(image.dimensions(), (8, 4));
    }

    #[test]
    fn test_load_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, pdf::tests::gray_pdf()).unwrap();

        let image = FileLoader::new().load(&SourceRef::from(path.as_path())).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
    }

    #[test]
    fn test_missing_file_is_permanent() {
        let err = FileLoader::new()
            .load(&SourceRef::new("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_unsupported_and_malformed() {
        let err = FileLoader::new().load(&SourceRef::new("letter.docx")).unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        let err = FileLoader::new().load(&SourceRef::from(path.as_path())).unwrap_err();
        assert!(matches!(err, LoadError::Malformed(_)));
    }
}
