//! Document assembly, validation and delivery.
//!
//! ```text
//! Assembling ──merge──▶ Assembled ──▶ Validating ──▶ Conformant     ─┐
//!                                                 ├─▶ Nonconformant ─┴▶ deliver
//!                                                 └─▶ Malformed      ──▶ error
//! ```
//!
//! A non-conformant verdict is a caveat, not a failure: the document is
//! still a valid, searchable PDF and is delivered with a warning. Only a
//! malformed document is withheld.

use crate::config::{PipelineConfig, ToolPaths};
use crate::error::OcrPdfError;
use crate::output::Conformance;
use crate::progress::ProgressCallback;
use crate::tools::ghostscript::{self, MergeRequest};
use crate::tools::{jhove, ToolLog};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Progress of the output document through assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Assembling,
    Assembled,
    Validating,
    Verdict(Conformance),
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyState::Assembling => f.write_str("assembling"),
            AssemblyState::Assembled => f.write_str("assembled"),
            AssemblyState::Validating => f.write_str("validating"),
            AssemblyState::Verdict(c) => write!(f, "{c}"),
        }
    }
}

/// Logged state holder shared by the merge stage and the final validation.
#[derive(Debug)]
pub struct Assembly {
    state: Mutex<AssemblyState>,
}

impl Default for Assembly {
    fn default() -> Self {
        Self {
            state: Mutex::new(AssemblyState::Assembling),
        }
    }
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AssemblyState {
        *self.lock()
    }

    fn enter(&self, next: AssemblyState) {
        let mut state = self.lock();
        info!(from = %*state, to = %next, "Assembly state");
        *state = next;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AssemblyState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Format declaration ───────────────────────────────────────────────────

/// PostScript prefix that makes Ghostscript emit a PDF/A output intent.
pub fn pdfa_definition(icc_profile: &Path, title: Option<&str>) -> String {
    let docinfo = match title {
        Some(t) => format!("[ /Title {} /DOCINFO pdfmark\n", ps_text(t)),
        None => String::new(),
    };
    format!(
        "%!\n\
% Prefix for PDF/A output: embeds the ICC profile as the output intent.\n\
/ICCProfile {icc} def\n\
{docinfo}\
[/_objdef {{icc_PDFA}} /type /stream /OBJ pdfmark\n\
[{{icc_PDFA}} << /N 3 >> /PUT pdfmark\n\
[{{icc_PDFA}} ICCProfile (r) file /PUT pdfmark\n\
[/_objdef {{OutputIntent_PDFA}} /type /dict /OBJ pdfmark\n\
[{{OutputIntent_PDFA}} <<\n\
  /Type /OutputIntent\n\
  /S /GTS_PDFA1\n\
  /DestOutputProfile {{icc_PDFA}}\n\
  /OutputConditionIdentifier (sRGB)\n\
>> /PUT pdfmark\n\
[{{Catalog}} << /OutputIntents [ {{OutputIntent_PDFA}} ] >> /PUT pdfmark\n",
        icc = ps_string(&icc_profile.to_string_lossy()),
    )
}

/// PostScript literal string with `\`, `(` and `)` escaped.
fn ps_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('(');
    for c in s.chars() {
        if matches!(c, '\\' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(')');
    out
}

/// Text for a DOCINFO entry: a literal for ASCII, UTF-16BE hex otherwise.
fn ps_text(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return ps_string(s);
    }
    let mut hex = String::from("<FEFF");
    for unit in s.encode_utf16() {
        hex.push_str(&format!("{unit:04X}"));
    }
    hex.push('>');
    hex
}

pub async fn write_pdfa_definition(
    path: &Path,
    icc_profile: &Path,
    title: Option<&str>,
) -> Result<(), OcrPdfError> {
    tokio::fs::write(path, pdfa_definition(icc_profile, title))
        .await
        .map_err(|e| OcrPdfError::io(path, e))
}

// ── Merge ────────────────────────────────────────────────────────────────

/// Merge `pages` (in page order) behind `definition` into `candidate`, then
/// check the result has exactly one page per rendered page.
pub async fn merge_pages(
    config: &PipelineConfig,
    log: &ToolLog,
    assembly: &Assembly,
    definition: &Path,
    pages: &[PathBuf],
    candidate: &Path,
) -> Result<(), OcrPdfError> {
    assembly.enter(AssemblyState::Assembling);
    info!("Merging {} pages into {}", pages.len(), candidate.display());
    ghostscript::merge_pdfa(
        &config.tools,
        log,
        &MergeRequest {
            definition,
            pages,
            output: candidate,
            level: config.pdfa_level,
            icc_profile: &config.icc_profile,
            threads: config.jobs,
        },
    )
    .await?;

    let found = count_pages(candidate).await?;
    if found != pages.len() {
        return Err(OcrPdfError::ToolExecution {
            program: ghostscript::LABEL.to_string(),
            exit_code: Some(0),
            argv: Vec::new(),
            stderr: format!(
                "merged document has {found} pages, expected {}",
                pages.len()
            ),
        });
    }
    assembly.enter(AssemblyState::Assembled);
    Ok(())
}

async fn count_pages(path: &Path) -> Result<usize, OcrPdfError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        lopdf::Document::load(&owned)
            .map(|doc| doc.get_pages().len())
            .map_err(|e| OcrPdfError::ToolExecution {
                program: ghostscript::LABEL.to_string(),
                exit_code: Some(0),
                argv: Vec::new(),
                stderr: format!("merged document '{}' is unreadable: {e}", owned.display()),
            })
    })
    .await
    .map_err(|e| OcrPdfError::Internal(format!("page count task panicked: {e}")))?
}

// ── Validation & delivery ────────────────────────────────────────────────

/// Validator verdict and how long it took.
#[derive(Debug, Clone, Copy)]
pub struct Delivery {
    pub conformance: Conformance,
    pub validation_time: Duration,
}

/// Validate `candidate` and, unless malformed, copy it to `output`.
pub async fn validate_and_deliver(
    tools: &ToolPaths,
    log: &ToolLog,
    assembly: &Assembly,
    candidate: &Path,
    output: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<Delivery, OcrPdfError> {
    assembly.enter(AssemblyState::Validating);
    let start = Instant::now();
    let conformance = jhove::validate(tools, log, candidate).await?;
    let validation_time = start.elapsed();
    assembly.enter(AssemblyState::Verdict(conformance));
    if let Some(cb) = progress {
        cb.on_validation(conformance);
    }

    if !conformance.delivers_output() {
        return Err(OcrPdfError::ToolExecution {
            program: jhove::PROGRAM.to_string(),
            exit_code: None,
            argv: Vec::new(),
            stderr: format!(
                "validator reports '{}' as not well-formed; no output written",
                candidate.display()
            ),
        });
    }
    if conformance == Conformance::Conformant {
        info!("Output is a well-formed, conformant PDF/A");
    } else {
        warn!("Output is well-formed but not conformant PDF/A; delivering anyway");
    }

    deliver(candidate, output).await?;
    Ok(Delivery {
        conformance,
        validation_time,
    })
}

/// Copy to `<output>.tmp`, then rename, so `output` never holds a partial
/// document.
async fn deliver(candidate: &Path, output: &Path) -> Result<(), OcrPdfError> {
    let write_err = |source| OcrPdfError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut tmp = output.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::copy(candidate, &tmp).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, output).await.map_err(write_err)?;
    info!("Wrote {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_declares_output_intent() {
        let def = pdfa_definition(Path::new("/usr/share/color/srgb.icc"), Some("Annual (draft)"));
        assert!(def.starts_with("%!"));
        assert!(def.contains("/ICCProfile (/usr/share/color/srgb.icc) def"));
        assert!(def.contains("[ /Title (Annual \\(draft\\)) /DOCINFO pdfmark"));
        assert!(def.contains("/S /GTS_PDFA1"));
        assert!(def.contains("[{icc_PDFA} ICCProfile (r) file /PUT pdfmark"));
    }

    #[test]
    fn definition_without_title_has_no_docinfo() {
        let def = pdfa_definition(Path::new("srgb.icc"), None);
        assert!(!def.contains("DOCINFO"));
    }

    #[test]
    fn non_ascii_title_is_utf16_hex() {
        assert_eq!(ps_text("é"), "<FEFF00E9>");
        assert_eq!(ps_text("a\\b"), "(a\\\\b)");
    }

    #[test]
    fn assembly_transitions() {
        let a = Assembly::new();
        assert_eq!(a.state(), AssemblyState::Assembling);
        a.enter(AssemblyState::Assembled);
        a.enter(AssemblyState::Validating);
        a.enter(AssemblyState::Verdict(Conformance::Nonconformant));
        assert_eq!(
            a.state(),
            AssemblyState::Verdict(Conformance::Nonconformant)
        );
    }

    #[tokio::test]
    async fn delivery_replaces_output_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("candidate.pdf");
        let output = dir.path().join("out").join("final.pdf");
        std::fs::write(&candidate, b"%PDF-1.7 merged").unwrap();

        deliver(&candidate, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-1.7 merged");
        assert!(!dir.path().join("out").join("final.pdf.tmp").exists());
    }
}
