//! Error types for the edgequake-ocrpdf library.
//!
//! A job either delivers a complete output document or fails as a whole, so
//! there is a single fatal error type, [`OcrPdfError`], returned from the
//! top-level `convert*` functions.
//!
//! Two things that look like errors are deliberately *not* in this enum:
//!
//! * An OCR timeout on one page. The invoker substitutes an empty hOCR page
//!   and the job continues; the page is reported as a fallback in
//!   [`crate::output::PageReport`].
//! * A non-conformant validation verdict. That is a
//!   [`crate::output::Conformance`] value carried in the job report and
//!   logged as a warning. Only a *malformed* verdict is escalated to
//!   [`OcrPdfError::ToolExecution`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ocrpdf library.
#[derive(Debug, Error)]
pub enum OcrPdfError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The OCR engine has no language data for some requested languages.
    #[error(
        "The installed tesseract has no language data for: {}\nInstall the missing traineddata packs or change --language.",
        missing.join(", ")
    )]
    UnsupportedLanguage { missing: Vec<String> },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The repaired document still could not be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Ghostscript cannot write PDF/A from pages scaled by `/UserUnit`.
    #[error(
        "Page {page} of '{path}' sets /UserUnit {user_unit}, which PDF/A output does not support"
    )]
    UnsupportedUserUnit {
        path: PathBuf,
        page: usize,
        user_unit: f64,
    },

    // ── External tool errors ──────────────────────────────────────────────
    /// The program could not be spawned (usually: not installed / not on PATH).
    #[error("Could not run '{program}': {source}\nIs it installed and on PATH?")]
    ToolNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external process exited non-zero or produced unusable output.
    #[error(
        "'{program}' failed (exit code {}): {stderr}\nCommand: {}",
        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
        argv.join(" ")
    )]
    ToolExecution {
        program: String,
        exit_code: Option<i32>,
        argv: Vec<String>,
        stderr: String,
    },

    /// An external process exceeded its timeout and no fallback applied.
    #[error("'{program}' timed out after {secs}s")]
    ToolTimeout { program: String, secs: u64 },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// A stage finished but the file it should have produced is absent.
    #[error("Expected intermediate file is missing: '{path}'")]
    MissingArtifact { path: PathBuf },

    /// The hOCR produced by the OCR engine could not be parsed.
    #[error("Could not parse hOCR '{path}': {detail}")]
    HocrParse { path: PathBuf, detail: String },

    /// A per-page PDF could not be built or saved.
    #[error("Failed to write page PDF '{path}': {detail}")]
    PdfWrite { path: PathBuf, detail: String },

    /// Filesystem error on an intermediate file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Programming-level invariant violations ───────────────────────────
    #[error(transparent)]
    State(#[from] StateError),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not write the final output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Invariant violations inside the pipeline engine.
///
/// These indicate a bug (a stage ran before its data existed, a graph was
/// declared inconsistently), never a problem with the user's input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("page metadata store was already populated")]
    AlreadyPopulated,

    #[error("page metadata store read before it was populated (page {index})")]
    NotPopulated { index: usize },

    #[error("page index {index} out of range (document has {len} pages)")]
    PageIndexOutOfRange { index: usize, len: usize },

    #[error("page descriptor at position {position} carries index {index}")]
    MisorderedPage { position: usize, index: usize },

    #[error("invalid task graph: {0}")]
    GraphDefinition(String),
}

/// Process exit codes used by the `ocrpdf` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    InputFile = 2,
    MissingDependency = 3,
    InvalidOutputPdfA = 4,
    FileAccessError = 5,
    OtherError = 15,
}

impl OcrPdfError {
    /// Shorthand for an I/O error on an intermediate path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OcrPdfError::Io {
            path: path.into(),
            source,
        }
    }

    /// Map the error onto the process exit code reported by the CLI.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            OcrPdfError::InvalidConfig(_) | OcrPdfError::UnsupportedLanguage { .. } => {
                ExitCode::BadArgs
            }
            OcrPdfError::FileNotFound { .. }
            | OcrPdfError::NotAPdf { .. }
            | OcrPdfError::CorruptPdf { .. }
            | OcrPdfError::UnsupportedUserUnit { .. } => ExitCode::InputFile,
            OcrPdfError::ToolNotFound { .. } => ExitCode::MissingDependency,
            OcrPdfError::ToolExecution { program, .. } if program == crate::tools::jhove::PROGRAM => {
                ExitCode::InvalidOutputPdfA
            }
            OcrPdfError::PermissionDenied { .. } | OcrPdfError::OutputWriteFailed { .. } => {
                ExitCode::FileAccessError
            }
            _ => ExitCode::OtherError,
        }
    }
}
