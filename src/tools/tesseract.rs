//! Tesseract: text recognition to hOCR.

use crate::config::{PipelineConfig, ToolPaths};
use crate::error::OcrPdfError;
use crate::tools::{ensure_produced, invoke, FallbackFn, ToolInvocation, ToolLog};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LABEL: &str = "tesseract";

const LIST_LANGS_TIMEOUT: Duration = Duration::from_secs(30);

/// Tesseract writes the input image path into the page title unescaped;
/// a path containing quotes or markup breaks XML parsing.
static IMAGE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"title='image "[^"]*";"#).expect("valid regex"));

/// Result of one recognition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrOutcome {
    /// Tesseract produced hOCR for the page.
    Recognized,
    /// Tesseract timed out; an empty hOCR page was written instead.
    Fallback,
}

/// One page to recognise.
#[derive(Debug, Clone)]
pub struct OcrRequest<'a> {
    pub image: &'a Path,
    /// Where the normalised hOCR must end up.
    pub output: &'a Path,
    /// `-l` argument, e.g. `eng+deu`.
    pub languages: &'a str,
    pub configs: &'a [String],
    pub timeout: Duration,
    /// Pixel size of the page, used for the empty fallback page.
    pub page_pixels: (u32, u32),
}

/// Marks an hOCR file written in place of a timed-out recognition.
const FALLBACK_META: &str = "<meta name='ocrpdf-fallback' content='ocr-timeout' />";

/// An hOCR document with a single empty page of the given pixel size.
pub fn hocr_template(width: u32, height: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
 <head>
  <title></title>
  <meta http-equiv="Content-Type" content="text/html;charset=utf-8" />
  <meta name='ocr-system' content='tesseract' />
  {FALLBACK_META}
 </head>
 <body>
  <div class='ocr_page' id='page_1' title='bbox 0 0 {width} {height}'></div>
 </body>
</html>
"#
    )
}

/// Whether `xml` is the empty page written after an OCR timeout.
pub fn is_fallback_hocr(xml: &str) -> bool {
    xml.contains(FALLBACK_META)
}

/// Recognise one page image.
///
/// On timeout the process is killed and an empty hOCR page the size of the
/// image is written to `req.output`; the caller renders that page image-only.
pub async fn recognize(
    tools: &ToolPaths,
    log: &ToolLog,
    req: &OcrRequest<'_>,
) -> Result<OcrOutcome, OcrPdfError> {
    // Tesseract appends its own suffix to the output base.
    let inv = ToolInvocation::new(LABEL, &tools.tesseract)
        .arg("-l")
        .arg(req.languages)
        .arg(req.image)
        .arg(req.output)
        .arg("hocr")
        .args(req.configs)
        .timeout(req.timeout);

    let fallback_path = req.output.to_path_buf();
    let (width, height) = req.page_pixels;
    let fallback: FallbackFn = Box::new(move || {
        std::fs::write(&fallback_path, hocr_template(width, height))
            .map_err(|e| OcrPdfError::io(&fallback_path, e))
    });

    let result = invoke(&inv, log, Some(fallback)).await?;
    if result.fallback_applied {
        warn!(
            "OCR of {} exceeded {}s; page will be image-only",
            req.image.display(),
            req.timeout.as_secs()
        );
        return Ok(OcrOutcome::Fallback);
    }

    normalize_output(req.output).await?;
    sanitize_image_title(req.output).await?;
    Ok(OcrOutcome::Recognized)
}

/// Move `<out>.hocr` (Tesseract ≥ 3.03) or `<out>.html` (3.02) to `out`.
async fn normalize_output(output: &Path) -> Result<(), OcrPdfError> {
    for suffix in [".hocr", ".html"] {
        let candidate = with_suffix(output, suffix);
        if tokio::fs::metadata(&candidate).await.is_ok() {
            tokio::fs::rename(&candidate, output)
                .await
                .map_err(|e| OcrPdfError::io(output, e))?;
            return Ok(());
        }
    }
    ensure_produced(output)
}

async fn sanitize_image_title(path: &Path) -> Result<(), OcrPdfError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OcrPdfError::io(path, e))?;
    let cleaned = IMAGE_TITLE.replace_all(&text, r#"title='image " ";"#);
    if cleaned != text {
        tokio::fs::write(path, cleaned.as_bytes())
            .await
            .map_err(|e| OcrPdfError::io(path, e))?;
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Languages for which the installed Tesseract has traineddata.
pub async fn installed_languages(
    tools: &ToolPaths,
    log: &ToolLog,
) -> Result<BTreeSet<String>, OcrPdfError> {
    let inv = ToolInvocation::new(LABEL, &tools.tesseract)
        .arg("--list-langs")
        .timeout(LIST_LANGS_TIMEOUT);
    let result = invoke(&inv, log, None).await?;
    // Older releases print the list on stderr.
    Ok(parse_language_list(&format!("{}\n{}", result.stdout, result.stderr)))
}

fn parse_language_list(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains(' ') && !l.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Fail with `UnsupportedLanguage` when any configured language is missing.
pub async fn check_languages(config: &PipelineConfig, log: &ToolLog) -> Result<(), OcrPdfError> {
    let installed = installed_languages(&config.tools, log).await?;
    debug!("Installed OCR languages: {:?}", installed);
    let missing: Vec<String> = config
        .languages
        .iter()
        .filter(|l| !installed.contains(*l))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(OcrPdfError::UnsupportedLanguage { missing });
    }
    info!("OCR languages: {}", config.language_arg());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_carries_page_bbox() {
        let t = hocr_template(2550, 3300);
        assert!(t.contains("class='ocr_page'"));
        assert!(t.contains("bbox 0 0 2550 3300"));
        assert!(!t.contains("ocrx_word"));
        assert!(is_fallback_hocr(&t));
        assert!(!is_fallback_hocr(crate::pipeline::hocr::SAMPLE));
    }

    #[test]
    fn language_list_parsing() {
        let out = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nosd\ndeu\n";
        let langs = parse_language_list(out);
        assert_eq!(
            langs.into_iter().collect::<Vec<_>>(),
            vec!["deu", "eng", "osd"]
        );
    }

    #[test]
    fn legacy_language_list_header() {
        let langs = parse_language_list("List of available languages (2):\neng\nfra\n");
        assert!(langs.contains("fra"));
        assert_eq!(langs.len(), 2);
    }

    #[tokio::test]
    async fn image_title_is_blanked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.hocr");
        std::fs::write(
            &path,
            r#"<div class='ocr_page' title='image "/tmp/a&b<c>.png"; bbox 0 0 10 10'>"#,
        )
        .unwrap();
        sanitize_image_title(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            r#"<div class='ocr_page' title='image " "; bbox 0 0 10 10'>"#
        );
    }

    #[tokio::test]
    async fn versioned_suffix_is_normalised() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("000001.hocr");
        std::fs::write(dir.path().join("000001.hocr.html"), "x").unwrap();
        normalize_output(&out).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "x");
    }

    #[tokio::test]
    async fn absent_output_is_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("000001.hocr");
        let err = normalize_output(&out).await.unwrap_err();
        assert!(matches!(err, OcrPdfError::MissingArtifact { .. }));
    }
}
