//! Per-page render: page image + hOCR → single-page searchable PDF.
//!
//! ## Why an invisible text layer?
//!
//! The page image stays the visual truth. Recognised words are drawn on top
//! in text render mode 3 (neither filled nor stroked), at the position and
//! size the OCR engine measured, so viewers can search and select text that
//! lines up with the pixels underneath.
//!
//! ## Why horizontal scaling instead of font metrics?
//!
//! The page font is the standard Helvetica, not the typeface of the scan.
//! Each word gets its own `Tz` so its Helvetica advance exactly fills the
//! measured box; selection highlights then cover the right pixels.
//!
//! ## Why spawn_blocking?
//!
//! Decoding and re-encoding a 300 dpi page image is CPU-bound work that
//! would stall a Tokio worker for tens of milliseconds.

use crate::error::OcrPdfError;
use crate::pagemeta::PageDescriptor;
use crate::pipeline::hocr::{self, BBox, HocrPage};
use crate::tools::ghostscript::RasterDevice;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the render stage needs for one page.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub image: PathBuf,
    pub hocr: PathBuf,
    pub output: PathBuf,
    pub page: PageDescriptor,
    pub device: RasterDevice,
    pub debug: bool,
}

/// Summary of one rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedPage {
    /// Text runs placed in the text layer.
    pub words: usize,
}

pub async fn render_page(req: RenderRequest) -> Result<RenderedPage, OcrPdfError> {
    tokio::task::spawn_blocking(move || render_page_blocking(&req))
        .await
        .map_err(|e| OcrPdfError::Internal(format!("Render task panicked: {}", e)))?
}

pub fn render_page_blocking(req: &RenderRequest) -> Result<RenderedPage, OcrPdfError> {
    let hocr = hocr::parse_file(&req.hocr)?;
    let img = image::open(&req.image).map_err(|e| OcrPdfError::PdfWrite {
        path: req.output.clone(),
        detail: format!("cannot decode page image '{}': {e}", req.image.display()),
    })?;

    let dpi = req.page.render_dpi();
    let layout = PageLayout::new(&hocr, &img, dpi);
    let xobject = encode_image(&img, req.device).map_err(|detail| OcrPdfError::PdfWrite {
        path: req.output.clone(),
        detail,
    })?;

    let (content, words) = content_stream(&hocr, &layout, req.debug);
    let mut doc = single_page_document(&layout, xobject, content);
    save_atomically(&mut doc, &req.output)?;

    debug!(
        page = req.page.index,
        words,
        "Rendered {:.0}x{:.0}pt page",
        layout.width_pt,
        layout.height_pt
    );
    Ok(RenderedPage { words })
}

/// Page size in points plus the pixel → point mapping.
#[derive(Debug, Clone, Copy)]
struct PageLayout {
    width_pt: f64,
    height_pt: f64,
    dpi: f64,
}

impl PageLayout {
    fn new(hocr: &HocrPage, img: &DynamicImage, dpi: f64) -> Self {
        let (w_px, h_px) = match hocr.page_box {
            Some(b) if b.width() > 0.0 && b.height() > 0.0 => (b.width(), b.height()),
            _ => (img.width() as f64, img.height() as f64),
        };
        Self {
            width_pt: w_px / dpi * 72.0,
            height_pt: h_px / dpi * 72.0,
            dpi,
        }
    }

    fn pt(&self, px: f64) -> f64 {
        px / self.dpi * 72.0
    }

    /// Box in PDF user space: `(x, y, w, h)` with origin bottom-left.
    fn rect(&self, b: &BBox) -> (f64, f64, f64, f64) {
        (
            self.pt(b.x1),
            self.height_pt - self.pt(b.y2),
            self.pt(b.width()),
            self.pt(b.height()),
        )
    }
}

fn content_stream(hocr: &HocrPage, layout: &PageLayout, debug: bool) -> (Vec<u8>, usize) {
    let mut ops = Vec::new();
    let mut line = String::new();
    let _ = writeln!(
        line,
        "q {} 0 0 {} 0 0 cm /Im0 Do Q",
        num(layout.width_pt),
        num(layout.height_pt)
    );
    ops.extend_from_slice(line.as_bytes());

    if debug {
        ops.extend_from_slice(b"q 0 1 1 rg\n");
        for p in &hocr.paragraphs {
            let (x, y, w, h) = layout.rect(p);
            ops.extend_from_slice(format!("{} {} {} {} re f\n", num(x), num(y), num(w), num(h)).as_bytes());
        }
        ops.extend_from_slice(b"Q\nq 1 0 0 RG [2 2] 0 d 0.5 w\n");
        for run in hocr.text_runs() {
            let (x, y, w, h) = layout.rect(&run.bbox);
            ops.extend_from_slice(format!("{} {} {} {} re S\n", num(x), num(y), num(w), num(h)).as_bytes());
        }
        ops.extend_from_slice(b"Q\n");
    }

    let mut placed = 0;
    let runs = hocr.text_runs();
    if !runs.is_empty() {
        ops.extend_from_slice(if debug { b"BT 0 Tr\n" } else { b"BT 3 Tr\n" });
        for run in runs {
            let (x, y, w, h) = layout.rect(&run.bbox);
            let encoded = win_ansi(&run.text);
            let advance = helvetica_width(&encoded) / 1000.0 * h;
            if w <= 0.0 || h <= 0.0 || advance <= 0.0 {
                continue;
            }
            let scale = 100.0 * w / advance;
            ops.extend_from_slice(
                format!(
                    "/F1 {} Tf {} Tz 1 0 0 1 {} {} Tm ",
                    num(h),
                    num(scale),
                    num(x),
                    num(y)
                )
                .as_bytes(),
            );
            push_literal(&mut ops, &encoded);
            ops.extend_from_slice(b" Tj\n");
            placed += 1;
        }
        ops.extend_from_slice(b"ET\n");
    }
    (ops, placed)
}

/// Compact number formatting for content streams.
fn num(v: f64) -> String {
    let s = format!("{:.3}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn push_literal(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        if matches!(b, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b')');
}

/// Encode `text` in WinAnsiEncoding; unmappable characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

/// Helvetica advance widths (1/1000 em) for 0x20..=0x7E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

fn helvetica_width(encoded: &[u8]) -> f64 {
    encoded
        .iter()
        .map(|&b| match b {
            0x20..=0x7E => HELVETICA_ASCII[(b - 0x20) as usize] as f64,
            _ => 556.0,
        })
        .sum()
}

/// Image XObject dictionary entries plus Flate-compressed samples.
struct ImageXObject {
    width: u32,
    height: u32,
    color_space: &'static str,
    bits: u8,
    data: Vec<u8>,
}

fn encode_image(img: &DynamicImage, device: RasterDevice) -> Result<ImageXObject, String> {
    let (width, height) = (img.width(), img.height());
    let (color_space, bits, raw) = match device {
        RasterDevice::Mono => ("DeviceGray", 1, pack_bits(&img.to_luma8())),
        RasterDevice::Gray => ("DeviceGray", 8, img.to_luma8().into_raw()),
        RasterDevice::Color => ("DeviceRGB", 8, img.to_rgb8().into_raw()),
    };
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&raw).map_err(|e| format!("compressing image: {e}"))?;
    let data = enc.finish().map_err(|e| format!("compressing image: {e}"))?;
    Ok(ImageXObject {
        width,
        height,
        color_space,
        bits,
        data,
    })
}

/// Threshold to 1 bit per pixel, rows padded to whole bytes; 1 is white.
fn pack_bits(gray: &image::GrayImage) -> Vec<u8> {
    let (w, h) = gray.dimensions();
    let row_bytes = (w as usize).div_ceil(8);
    let mut out = vec![0u8; row_bytes * h as usize];
    for (x, y, px) in gray.enumerate_pixels() {
        if px.0[0] >= 128 {
            out[y as usize * row_bytes + x as usize / 8] |= 0x80 >> (x % 8);
        }
    }
    out
}

fn single_page_document(layout: &PageLayout, image: ImageXObject, content: Vec<u8>) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id: ObjectId = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => image.bits as i64,
            "Filter" => "FlateDecode",
        },
        image.data,
    ));
    let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            Object::Real(layout.width_pt as f32),
            Object::Real(layout.height_pt as f32),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::from(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// Write to a `.tmp` sibling, then rename over `output`.
fn save_atomically(doc: &mut Document, output: &Path) -> Result<(), OcrPdfError> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(|e| OcrPdfError::PdfWrite {
        path: output.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut tmp = output.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, &buf).map_err(|e| OcrPdfError::io(&tmp, e))?;
    std::fs::rename(&tmp, output).map_err(|e| OcrPdfError::io(output, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagemeta::test_page;

    struct Fixture {
        _dir: tempfile::TempDir,
        req: RenderRequest,
    }

    fn fixture(hocr_text: &str, device: RasterDevice, debug: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("000001.page.png");
        let hocr = dir.path().join("000001.hocr");
        let output = dir.path().join("000001.rendered.pdf");
        image::GrayImage::from_fn(2550, 330, |x, _| image::Luma([if x % 2 == 0 { 0 } else { 255 }]))
            .save(&image)
            .unwrap();
        std::fs::write(&hocr, hocr_text).unwrap();
        Fixture {
            req: RenderRequest {
                image,
                hocr,
                output,
                page: test_page(0),
                device,
                debug,
            },
            _dir: dir,
        }
    }

    fn page_content(path: &Path) -> (Document, String) {
        let doc = Document::load(path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        let page_id = *doc.get_pages().values().next().unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        (doc, String::from_utf8_lossy(&content).into_owned())
    }

    #[test]
    fn recognised_words_become_invisible_text() {
        let f = fixture(crate::pipeline::hocr::SAMPLE, RasterDevice::Mono, false);
        let rendered = render_page_blocking(&f.req).unwrap();
        assert_eq!(rendered.words, 2);

        let (doc, content) = page_content(&f.req.output);
        assert!(content.contains("BT 3 Tr"), "{content}");
        assert!(content.contains("(Hello) Tj"), "{content}");
        assert!(!content.contains(" re "), "production mode draws no boxes");

        // 2550x3300 px at 300 dpi is US Letter, taken from the hOCR page box.
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let n = |o: &Object| match o {
            Object::Integer(i) => *i as f64,
            Object::Real(r) => *r as f64,
            other => panic!("not a number: {other:?}"),
        };
        assert!((n(&mb[2]) - 612.0).abs() < 0.01);
        assert!((n(&mb[3]) - 792.0).abs() < 0.01);
    }

    #[test]
    fn fallback_hocr_renders_image_only_page() {
        let template = crate::tools::tesseract::hocr_template(2550, 3300);
        let f = fixture(&template, RasterDevice::Mono, false);
        let rendered = render_page_blocking(&f.req).unwrap();
        assert_eq!(rendered.words, 0);
        let (_, content) = page_content(&f.req.output);
        assert!(content.contains("/Im0 Do"));
        assert!(!content.contains("Tj"));
    }

    #[test]
    fn debug_mode_shows_boxes_and_text() {
        let f = fixture(crate::pipeline::hocr::SAMPLE, RasterDevice::Gray, true);
        render_page_blocking(&f.req).unwrap();
        let (_, content) = page_content(&f.req.output);
        assert!(content.contains("re f"));
        assert!(content.contains("re S"));
        assert!(content.contains("BT 0 Tr"));
    }

    #[test]
    fn mono_device_keeps_one_bit_samples() {
        let f = fixture(crate::pipeline::hocr::SAMPLE, RasterDevice::Mono, false);
        render_page_blocking(&f.req).unwrap();
        let doc = Document::load(&f.req.output).unwrap();
        let image = doc
            .objects
            .values()
            .find_map(|o| match o {
                Object::Stream(s)
                    if matches!(s.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image") =>
                {
                    Some(s)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(image.dict.get(b"BitsPerComponent").unwrap().as_i64().unwrap(), 1);
    }

    #[test]
    fn pack_bits_pads_rows() {
        let img = image::GrayImage::from_fn(9, 2, |x, _| image::Luma([if x == 0 { 255 } else { 0 }]));
        assert_eq!(pack_bits(&img), vec![0x80, 0x00, 0x80, 0x00]);
    }

    #[test]
    fn literal_strings_are_escaped() {
        let mut out = Vec::new();
        push_literal(&mut out, b"a(b)\\");
        assert_eq!(out, b"(a\\(b\\)\\\\)");
    }

    #[test]
    fn win_ansi_maps_latin1_and_punctuation() {
        assert_eq!(win_ansi("é—x"), vec![0xE9, 0x97, b'x']);
        assert_eq!(win_ansi("日"), vec![b'?']);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(num(12.0), "12");
        assert_eq!(num(0.5), "0.5");
        assert_eq!(num(-0.0001), "0");
        assert_eq!(num(1.23456), "1.235");
    }
}
