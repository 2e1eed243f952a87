//! Page geometry and image inventory of the repaired document.
//!
//! Runs once, right after repair, and produces the descriptors that populate
//! the [`crate::pagemeta::PageMetadataStore`]. Parsing is CPU-bound, so the
//! async entry point moves it onto the blocking pool.

use crate::error::OcrPdfError;
use crate::pagemeta::{ImageColor, ImageRef, PageDescriptor};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolution assumed for pages that carry no images.
const DEFAULT_DPI: f64 = 300.0;
const MIN_RENDER_DPI: f64 = 72.0;
const MAX_RENDER_DPI: f64 = 600.0;
/// Form XObjects nest; deeper nesting is ignored.
const MAX_FORM_DEPTH: usize = 4;

/// Everything the pipeline needs to know about the input document.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub pages: Vec<PageDescriptor>,
    /// `/Info /Title`, when present and non-empty.
    pub title: Option<String>,
}

/// Parse `path` on the blocking pool.
pub async fn extract_page_info(path: &Path) -> Result<DocumentInfo, OcrPdfError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_page_info_blocking(&owned))
        .await
        .map_err(|e| OcrPdfError::Internal(format!("page info task panicked: {e}")))?
}

pub fn extract_page_info_blocking(path: &Path) -> Result<DocumentInfo, OcrPdfError> {
    let doc = Document::load(path).map_err(|e| corrupt(path, format!("failed to parse: {e}")))?;

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    if page_ids.is_empty() {
        return Err(corrupt(path, "document has no pages".into()));
    }

    let mut pages = Vec::with_capacity(page_ids.len());
    for (index, page_id) in page_ids.into_iter().enumerate() {
        let page = describe_page(&doc, page_id, index).map_err(|detail| corrupt(path, detail))?;
        debug!(
            page = index,
            images = page.images.len(),
            "{:.0}x{:.0}pt at {:.0}x{:.0} dpi",
            page.width_pt,
            page.height_pt,
            page.xres_render,
            page.yres_render
        );
        pages.push(page);
    }

    Ok(DocumentInfo {
        pages,
        title: document_title(&doc),
    })
}

fn corrupt(path: &Path, detail: String) -> OcrPdfError {
    OcrPdfError::CorruptPdf {
        path: PathBuf::from(path),
        detail,
    }
}

fn describe_page(doc: &Document, page_id: ObjectId, index: usize) -> Result<PageDescriptor, String> {
    let media_box = match resolve_inherited(doc, page_id, b"MediaBox")? {
        Some(obj) => rect(resolve(doc, obj))?,
        None => {
            warn!(page = index, "No MediaBox; assuming US Letter");
            [0.0, 0.0, 612.0, 792.0]
        }
    };
    let user_unit = page_dict(doc, page_id)?
        .get(b"UserUnit")
        .ok()
        .and_then(number)
        .unwrap_or(1.0);
    let rotate = resolve_inherited(doc, page_id, b"Rotate")?
        .and_then(|o| resolve(doc, o).as_i64().ok())
        .unwrap_or(0)
        .rem_euclid(360);

    let mut width_pt = (media_box[2] - media_box[0]).abs() * user_unit;
    let mut height_pt = (media_box[3] - media_box[1]).abs() * user_unit;
    if width_pt <= 0.0 || height_pt <= 0.0 {
        return Err(format!("page {} has an empty MediaBox", index + 1));
    }

    let mut images = Vec::new();
    if let Some(resources) = resolve_inherited(doc, page_id, b"Resources")? {
        if let Ok(dict) = resolve(doc, resources).as_dict() {
            collect_images(doc, dict, 0, &mut images);
        }
    }

    let (mut xres, mut yres) = native_resolution(&images, width_pt, height_pt);
    if rotate == 90 || rotate == 270 {
        std::mem::swap(&mut width_pt, &mut height_pt);
        std::mem::swap(&mut xres, &mut yres);
    }

    Ok(PageDescriptor {
        index,
        width_pt,
        height_pt,
        user_unit,
        images,
        xres,
        yres,
        xres_render: render_resolution(xres),
        yres_render: render_resolution(yres),
    })
}

/// Largest image pixel extent per inch of page, per axis.
fn native_resolution(images: &[ImageRef], width_pt: f64, height_pt: f64) -> (f64, f64) {
    if images.is_empty() {
        return (DEFAULT_DPI, DEFAULT_DPI);
    }
    let width_in = width_pt / 72.0;
    let height_in = height_pt / 72.0;
    let xres = images
        .iter()
        .map(|im| im.width as f64 / width_in)
        .fold(0.0, f64::max);
    let yres = images
        .iter()
        .map(|im| im.height as f64 / height_in)
        .fold(0.0, f64::max);
    (xres, yres)
}

fn render_resolution(native: f64) -> f64 {
    native.clamp(MIN_RENDER_DPI, MAX_RENDER_DPI).round()
}

fn collect_images(doc: &Document, resources: &Dictionary, depth: usize, out: &mut Vec<ImageRef>) {
    let Ok(xobjects) = resources.get(b"XObject") else {
        return;
    };
    let Ok(xobjects) = resolve(doc, xobjects).as_dict() else {
        return;
    };
    for (_, obj) in xobjects.iter() {
        let Object::Stream(stream) = resolve(doc, obj) else {
            continue;
        };
        match name(stream.dict.get(b"Subtype").ok()) {
            Some(b"Image") => out.push(image_ref(doc, &stream.dict)),
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                if let Some(inner) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| resolve(doc, r).as_dict().ok())
                {
                    collect_images(doc, inner, depth + 1, out);
                }
            }
            _ => {}
        }
    }
}

fn image_ref(doc: &Document, dict: &Dictionary) -> ImageRef {
    let int = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|o| resolve(doc, o).as_i64().ok())
    };
    let width = int(b"Width").unwrap_or(0).max(0) as u32;
    let height = int(b"Height").unwrap_or(0).max(0) as u32;

    let is_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
    if is_mask {
        return ImageRef {
            width,
            height,
            components: 1,
            bits_per_component: 1,
            color: ImageColor::Gray,
        };
    }

    let bits_per_component = int(b"BitsPerComponent").unwrap_or(8).clamp(1, 16) as u8;
    let (components, color) = match dict.get(b"ColorSpace") {
        Ok(cs) => color_space(doc, resolve(doc, cs)),
        Err(_) => (3, ImageColor::Unknown),
    };
    ImageRef {
        width,
        height,
        components,
        bits_per_component,
        color,
    }
}

/// Components per pixel and colour class of a colour space object.
fn color_space(doc: &Document, cs: &Object) -> (u8, ImageColor) {
    match cs {
        Object::Name(n) => device_space(n),
        Object::Array(parts) => {
            let family = parts.first().map(|o| resolve(doc, o));
            match family {
                Some(Object::Name(n)) => match n.as_slice() {
                    b"ICCBased" => {
                        let n = parts
                            .get(1)
                            .map(|o| resolve(doc, o))
                            .and_then(|o| match o {
                                Object::Stream(s) => s.dict.get(b"N").ok().and_then(|n| n.as_i64().ok()),
                                _ => None,
                            })
                            .unwrap_or(3);
                        if n == 1 {
                            (1, ImageColor::Gray)
                        } else {
                            (n.clamp(1, 4) as u8, ImageColor::Color)
                        }
                    }
                    // One palette index per pixel, palette entries may be colour.
                    b"Indexed" | b"I" => (1, ImageColor::Color),
                    b"Separation" => (1, ImageColor::Gray),
                    b"DeviceN" => {
                        let n = parts
                            .get(1)
                            .and_then(|o| resolve(doc, o).as_array().ok())
                            .map(|a| a.len())
                            .unwrap_or(3);
                        (n.clamp(1, 4) as u8, ImageColor::Color)
                    }
                    b"Lab" => (3, ImageColor::Color),
                    other => device_space(other),
                },
                _ => (3, ImageColor::Unknown),
            }
        }
        _ => (3, ImageColor::Unknown),
    }
}

fn device_space(name: &[u8]) -> (u8, ImageColor) {
    match name {
        b"DeviceGray" | b"CalGray" | b"G" => (1, ImageColor::Gray),
        b"DeviceRGB" | b"CalRGB" | b"RGB" => (3, ImageColor::Color),
        b"DeviceCMYK" | b"CMYK" => (4, ImageColor::Color),
        _ => (3, ImageColor::Unknown),
    }
}

fn document_title(doc: &Document) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let info = resolve(doc, info).as_dict().ok()?;
    let title = match resolve(doc, info.get(b"Title").ok()?) {
        Object::String(bytes, _) => decode_text_string(bytes)?,
        _ => return None,
    };
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// PDF text string: UTF-16BE with BOM, otherwise UTF-8 or Latin-1.
fn decode_text_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16(&units).ok();
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        Err(_) => Some(bytes.iter().map(|&b| b as char).collect()),
    }
}

// ── lopdf helpers ────────────────────────────────────────────────────────

fn page_dict(doc: &Document, id: ObjectId) -> Result<&Dictionary, String> {
    doc.get_object(id)
        .and_then(|o| o.as_dict())
        .map_err(|e| format!("failed to get page dictionary: {e}"))
}

/// Look up `key` on the page, walking up `/Parent` links until found.
fn resolve_inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, String> {
    let mut current = page_id;
    // Bounded walk: a malformed tree may link a node to itself.
    for _ in 0..64 {
        let dict = page_dict(doc, current)?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(value));
        }
        match dict.get(b"Parent") {
            Ok(parent) => {
                current = parent
                    .as_reference()
                    .map_err(|e| format!("invalid /Parent reference: {e}"))?;
            }
            Err(_) => return Ok(None),
        }
    }
    Err("page tree /Parent chain does not terminate".into())
}

/// Follow indirect references to the referenced object.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    let mut current = obj;
    for _ in 0..16 {
        match current {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => current = target,
                Err(_) => return current,
            },
            _ => return current,
        }
    }
    current
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(*f as f64),
        _ => None,
    }
}

fn name(obj: Option<&Object>) -> Option<&[u8]> {
    match obj {
        Some(Object::Name(n)) => Some(n.as_slice()),
        _ => None,
    }
}

fn rect(obj: &Object) -> Result<[f64; 4], String> {
    let arr = obj
        .as_array()
        .map_err(|e| format!("MediaBox is not an array: {e}"))?;
    if arr.len() != 4 {
        return Err(format!("expected 4-element MediaBox, got {}", arr.len()));
    }
    let mut out = [0.0; 4];
    for (slot, v) in out.iter_mut().zip(arr) {
        *slot = number(v).ok_or_else(|| format!("expected number in MediaBox, got {v:?}"))?;
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{dictionary, Document, Object, ObjectId, Stream};

    /// A document whose pages each carry one full-page 1-bit image.
    ///
    /// Page size is US Letter and the image is 2550×3300, i.e. 300 dpi.
    pub fn mono_scan(page_count: usize, title: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id: ObjectId = doc.new_object_id();

        let mut kids: Vec<Object> = Vec::new();
        for _ in 0..page_count {
            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2550,
                    "Height" => 3300,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 1,
                },
                vec![0u8; 16],
            );
            let image_id = doc.add_object(image);
            let content = doc.add_object(Stream::new(
                lopdf::Dictionary::new(),
                b"q 612 0 0 792 0 0 cm /Im0 Do Q".to_vec(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => image_id },
                },
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(t) = title {
            let info_id = doc.add_object(dictionary! {
                "Title" => Object::string_literal(t),
            });
            doc.trailer.set("Info", info_id);
        }

        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("failed to save test PDF");
        buf
    }
}
