//! Minimal hOCR reader.
//!
//! Only what the text layer needs is kept: the page box, paragraph boxes
//! (for debug rendering), and the text runs of every word and line, all in
//! image pixel coordinates with the origin top-left.

use crate::error::OcrPdfError;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::path::Path;

static BBOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bbox\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)")
        .expect("valid regex")
});

/// Axis-aligned box in image pixels: `(x1, y1)` top-left, `(x2, y2)`
/// bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    fn parse(title: &str) -> Option<Self> {
        let caps = BBOX.captures(title)?;
        let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
        Some(BBox {
            x1: n(1)?,
            y1: n(2)?,
            x2: n(3)?,
            y2: n(4)?,
        })
    }
}

/// Recognised text with its box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub bbox: BBox,
    pub text: String,
}

/// One parsed hOCR page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HocrPage {
    /// `ocr_page` box; `None` when the document carries none.
    pub page_box: Option<BBox>,
    pub paragraphs: Vec<BBox>,
    pub lines: Vec<TextRun>,
    pub words: Vec<TextRun>,
}

impl HocrPage {
    /// Runs to place on the page: words, or whole lines when the engine
    /// emitted no word elements.
    pub fn text_runs(&self) -> &[TextRun] {
        if self.words.is_empty() {
            &self.lines
        } else {
            &self.words
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Page,
    Paragraph,
    Line,
    Word,
}

impl Kind {
    fn from_class(class: &str) -> Option<Self> {
        class.split_whitespace().find_map(|c| match c {
            "ocr_page" => Some(Kind::Page),
            "ocr_par" => Some(Kind::Paragraph),
            // Tesseract 4+ tags headings and captions as line-level elements.
            "ocr_line" | "ocr_header" | "ocr_caption" | "ocr_textfloat" => Some(Kind::Line),
            "ocrx_word" => Some(Kind::Word),
            _ => None,
        })
    }
}

struct Frame {
    kind: Option<Kind>,
    bbox: Option<BBox>,
    text: String,
}

pub fn parse_file(path: &Path) -> Result<HocrPage, OcrPdfError> {
    let xml = std::fs::read_to_string(path).map_err(|e| OcrPdfError::io(path, e))?;
    parse_str(&xml).map_err(|detail| OcrPdfError::HocrParse {
        path: path.to_path_buf(),
        detail,
    })
}

pub fn parse_str(xml: &str) -> Result<HocrPage, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut page = HocrPage::default();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let frame = open(e);
                if frame.kind == Some(Kind::Page) && page.page_box.is_none() {
                    page.page_box = frame.bbox;
                }
                stack.push(frame);
            }
            Ok(Event::Empty(ref e)) => {
                let frame = open(e);
                if frame.kind == Some(Kind::Page) && page.page_box.is_none() {
                    page.page_box = frame.bbox;
                }
                close(frame, &mut stack, &mut page);
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                for frame in stack.iter_mut() {
                    if matches!(frame.kind, Some(Kind::Word | Kind::Line)) {
                        frame.text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| "closing tag without opening tag".to_string())?;
                close(frame, &mut stack, &mut page);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                ))
            }
        }
    }

    Ok(page)
}

fn open(e: &BytesStart<'_>) -> Frame {
    let mut class = None;
    let mut title = None;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"class" => class = Some(String::from_utf8_lossy(&attr.value).into_owned()),
            b"title" => title = Some(String::from_utf8_lossy(&attr.value).into_owned()),
            _ => {}
        }
    }
    Frame {
        kind: class.as_deref().and_then(Kind::from_class),
        bbox: title.as_deref().and_then(BBox::parse),
        text: String::new(),
    }
}

fn close(frame: Frame, stack: &mut [Frame], page: &mut HocrPage) {
    let Some(bbox) = frame.bbox else {
        return;
    };
    match frame.kind {
        Some(Kind::Paragraph) => page.paragraphs.push(bbox),
        Some(Kind::Line) => {
            let text = normalize(&frame.text);
            if !text.is_empty() {
                page.lines.push(TextRun { bbox, text });
            }
        }
        Some(Kind::Word) => {
            let text = normalize(&frame.text);
            if !text.is_empty() {
                page.words.push(TextRun { bbox, text });
            }
            // Separate this word from the next one in the enclosing line.
            if let Some(line) = stack.iter_mut().rev().find(|f| f.kind == Some(Kind::Line)) {
                line.text.push(' ');
            }
        }
        _ => {}
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN"
    "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
 <head>
  <title></title>
  <meta http-equiv="Content-Type" content="text/html;charset=utf-8" />
  <meta name='ocr-system' content='tesseract 4.1.1' />
 </head>
 <body>
  <div class='ocr_page' id='page_1' title='image " "; bbox 0 0 2550 3300; ppageno 0'>
   <div class='ocr_carea' id='block_1_1' title="bbox 300 300 1200 400">
    <p class='ocr_par' id='par_1_1' lang='eng' title="bbox 300 300 1200 400">
     <span class='ocr_line' id='line_1_1' title="bbox 300 300 1200 400; baseline 0 -10">
      <span class='ocrx_word' id='word_1_1' title='bbox 300 300 700 400; x_wconf 96'>Hello</span>
      <span class='ocrx_word' id='word_1_2' title='bbox 750 300 1200 400; x_wconf 95'><strong>world</strong>&amp;co</span>
     </span>
    </p>
   </div>
  </div>
 </body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_lines_and_page_box() {
        let page = parse_str(SAMPLE).unwrap();
        assert_eq!(
            page.page_box,
            Some(BBox {
                x1: 0.0,
                y1: 0.0,
                x2: 2550.0,
                y2: 3300.0
            })
        );
        assert_eq!(page.paragraphs.len(), 1);
        assert_eq!(page.words.len(), 2);
        assert_eq!(page.words[0].text, "Hello");
        assert_eq!(page.words[1].text, "world&co");
        assert_eq!(page.words[1].bbox.width(), 450.0);
        assert_eq!(page.lines.len(), 1);
        assert_eq!(page.lines[0].text, "Hello world&co");
        assert_eq!(page.text_runs().len(), 2);
    }

    #[test]
    fn lines_used_when_no_words() {
        let xml = r#"<html><body><div class='ocr_page' title='bbox 0 0 100 100'>
            <span class='ocr_line' title='bbox 10 10 90 30'>whole line</span>
            </div></body></html>"#;
        let page = parse_str(xml).unwrap();
        assert!(page.words.is_empty());
        assert_eq!(page.text_runs().len(), 1);
        assert_eq!(page.text_runs()[0].text, "whole line");
    }

    #[test]
    fn empty_page_has_no_runs() {
        let page = parse_str(&crate::tools::tesseract::hocr_template(640, 480)).unwrap();
        assert_eq!(page.page_box.map(|b| b.width()), Some(640.0));
        assert!(page.text_runs().is_empty());
    }

    #[test]
    fn whitespace_only_words_are_dropped() {
        let xml = r#"<div class='ocr_page' title='bbox 0 0 10 10'><span class='ocrx_word' title='bbox 1 1 2 2'> </span></div>"#;
        assert!(parse_str(xml).unwrap().words.is_empty());
    }

    #[test]
    fn broken_xml_is_an_error() {
        assert!(parse_str("<div class='ocr_page'><span></div>").is_err());
    }
}
