//! Raster image extraction from scanned PDFs.

use std::collections::HashSet;

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, trace};

use crate::error::LoadError;

/// Decode the first embedded raster image of a PDF, preferring the first page.
pub fn first_page_image(data: &[u8]) -> Result<DynamicImage, LoadError> {
    let mut doc = Document::load_mem(data).map_err(|e| LoadError::Malformed(e.to_string()))?;

    if doc.is_encrypted() {
        doc.decrypt("")
            .map_err(|_| LoadError::Unsupported("encrypted PDF".to_string()))?;
        debug!("decrypted PDF with empty password");
    }

    let pages = doc.get_pages();
    let first_page = pages
        .values()
        .next()
        .copied()
        .ok_or_else(|| LoadError::Malformed("PDF has no pages".to_string()))?;

    if let Some(image) = page_images(&doc, first_page).into_iter().next() {
        return Ok(image);
    }

    debug!("no XObject image on the first page, scanning all objects");
    doc.objects
        .values()
        .find_map(|object| decode_image(&doc, object))
        .ok_or_else(|| LoadError::Unsupported("PDF without a decodable raster image".to_string()))
}

fn page_images(doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Vec::new();
    };
    let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, reference)| doc.dereference(reference).ok())
        .filter_map(|(_, object)| decode_image(doc, object))
        .collect()
}

/// Resources of a page, following inheritance up the page tree.
///
/// A `Parent` chain that revisits a node yields `None`.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<lopdf::Dictionary> {
    let mut visited = HashSet::new();
    let mut node_id = page_id;

    while visited.insert(node_id) {
        let Object::Dictionary(node) = doc.get_object(node_id).ok()? else {
            return None;
        };

        if let Ok(resources) = node.get(b"Resources") {
            if let Ok((_, Object::Dictionary(resources))) = doc.dereference(resources) {
                return Some(resources.clone());
            }
        }

        match node.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => node_id = *parent_id,
            _ => return None,
        }
    }

    debug!(?page_id, "cyclic page tree");
    None
}

fn decode_image(doc: &Document, object: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = object else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    trace!(width, height, "found image object");

    let filter = dict.get(b"Filter").ok().and_then(|filter| match filter {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(filters) => filters.first().and_then(|o| o.as_name().ok()),
        _ => None,
    });
    match filter {
        Some(b"DCTDecode") => {
            return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg).ok();
        }
        Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
            trace!(filter = ?filter.map(String::from_utf8_lossy), "unsupported image filter");
            return None;
        }
        _ => {}
    }

    let bits = dict.get(b"BitsPerComponent").ok().and_then(|o| o.as_i64().ok()).unwrap_or(8);
    if bits != 8 {
        trace!(bits, "unsupported bits per component");
        return None;
    }

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(items) => items.first().and_then(|o| o.as_name().ok()),
            Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
            _ => None,
        })
        .unwrap_or(b"DeviceRGB");

    let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
    let Some(pixels) = (width as usize).checked_mul(height as usize) else {
        trace!(width, height, "image dimensions overflow");
        return None;
    };

    match color_space {
        b"DeviceRGB" | b"RGB" => {
            let len = pixels.checked_mul(3).filter(|len| data.len() >= *len)?;
            RgbImage::from_raw(width, height, data[..len].to_vec()).map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" if data.len() >= pixels => {
            GrayImage::from_raw(width, height, data[..pixels].to_vec()).map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!(data_len = data.len(), "could not decode raw image data");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::GenericImageView;
    use lopdf::{dictionary, Stream};

    /// A one-page PDF embedding a 2x2 grayscale image.
    pub(crate) fn gray_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0, 64, 128, 255],
        ));
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 2.into(), 2.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_extract_embedded_gray_image() {
        let image = first_page_image(&gray_pdf()).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.to_luma8().get_pixel(1, 1).0, [255]);
    }

    /// A one-page PDF whose page is its own parent and has no resources.
    fn self_parented_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.new_object_id();

        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => page_id,
                "MediaBox" => vec![0.into(), 0.into(), 2.into(), 2.into()],
            }),
        );
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_cyclic_parent_chain_rejected() {
        let err = first_page_image(&self_parented_pdf()).unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_) | LoadError::Malformed(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_oversized_dimensions_not_decoded() {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(u32::MAX),
                "Height" => i64::from(u32::MAX),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![0; 12],
        );
        let doc = Document::with_version("1.5");
        assert!(decode_image(&doc, &Object::Stream(stream)).is_none());
    }

    #[test]
    fn test_malformed_pdf() {
        let err = first_page_image(b"%PDF-1.5 definitely not a pdf").unwrap_err();
        assert!(matches!(err, LoadError::Malformed(_)));
        assert!(err.is_permanent());
    }
}
