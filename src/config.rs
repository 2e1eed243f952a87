//! Configuration types for the OCR → PDF/A pipeline.
//!
//! All job behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across concurrent stage workers (it is cloned
//! into an `Arc` once per job) and to log exactly what a run was asked to do.

use crate::error::OcrPdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one OCR job.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ocrpdf::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .languages(["eng", "deu"])
///     .jobs(4)
///     .ocr_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.languages, vec!["eng", "deu"]);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// OCR languages, in Tesseract's three-letter codes. Default: `["eng"]`.
    ///
    /// Passed to the engine as `-l eng+deu`. The legacy single-argument
    /// `"eng+deu"` form is accepted and split by the builder.
    pub languages: Vec<String>,

    /// Extra Tesseract config file names appended after `hocr`.
    pub tesseract_configs: Vec<String>,

    /// Maximum number of stage tasks running at once. Default: available CPUs.
    ///
    /// Every task spends most of its life waiting for an external process,
    /// so one slot per core keeps the machine busy without oversubscribing
    /// Tesseract, which is itself multi-threaded on large pages.
    pub jobs: usize,

    /// Per-page OCR timeout. Default: 180 s.
    ///
    /// A page that exceeds it is rendered image-only instead of failing the
    /// job.
    pub ocr_timeout: Duration,

    /// Parent directory for intermediate files. Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Keep the working directory after the job finishes. Default: false.
    pub keep_temporary_files: bool,

    /// Render the text layer visibly with bounding boxes. Default: false.
    pub debug_rendering: bool,

    /// Target PDF/A part passed to the compositor (`-dPDFA=<n>`). Default: 2.
    pub pdfa_level: PdfALevel,

    /// ICC profile used as the PDF/A output intent. Default: `srgb.icc`.
    pub icc_profile: PathBuf,

    /// Locations of the external programs.
    pub tools: ToolPaths,

    /// Query `tesseract --list-langs` before any stage runs. Default: true.
    pub check_languages: bool,

    /// Optional per-page / per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            languages: vec!["eng".to_string()],
            tesseract_configs: Vec::new(),
            jobs: default_jobs(),
            ocr_timeout: Duration::from_secs(180),
            temp_dir: None,
            keep_temporary_files: false,
            debug_rendering: false,
            pdfa_level: PdfALevel::default(),
            icc_profile: PathBuf::from("srgb.icc"),
            tools: ToolPaths::default(),
            check_languages: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("languages", &self.languages)
            .field("tesseract_configs", &self.tesseract_configs)
            .field("jobs", &self.jobs)
            .field("ocr_timeout", &self.ocr_timeout)
            .field("temp_dir", &self.temp_dir)
            .field("keep_temporary_files", &self.keep_temporary_files)
            .field("debug_rendering", &self.debug_rendering)
            .field("pdfa_level", &self.pdfa_level)
            .field("icc_profile", &self.icc_profile)
            .field("tools", &self.tools)
            .field("check_languages", &self.check_languages)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The `-l` argument for Tesseract.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the OCR languages. Entries of the form `"eng+deu"` are split.
    pub fn languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.languages = langs
            .into_iter()
            .flat_map(|l| {
                l.as_ref()
                    .split('+')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect();
        self
    }

    pub fn tesseract_configs<I, S>(mut self, configs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.tesseract_configs = configs.into_iter().map(Into::into).collect();
        self
    }

    pub fn jobs(mut self, n: usize) -> Self {
        self.config.jobs = n;
        self
    }

    pub fn ocr_timeout(mut self, timeout: Duration) -> Self {
        self.config.ocr_timeout = timeout;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout = Duration::from_secs(secs);
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn keep_temporary_files(mut self, v: bool) -> Self {
        self.config.keep_temporary_files = v;
        self
    }

    pub fn debug_rendering(mut self, v: bool) -> Self {
        self.config.debug_rendering = v;
        self
    }

    pub fn pdfa_level(mut self, level: PdfALevel) -> Self {
        self.config.pdfa_level = level;
        self
    }

    pub fn icc_profile(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.icc_profile = path.into();
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn check_languages(mut self, v: bool) -> Self {
        self.config.check_languages = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrPdfError> {
        let c = &self.config;
        if c.languages.is_empty() {
            return Err(OcrPdfError::InvalidConfig(
                "At least one OCR language is required".into(),
            ));
        }
        if let Some(bad) = c
            .languages
            .iter()
            .find(|l| !l.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
        {
            return Err(OcrPdfError::InvalidConfig(format!(
                "Malformed language code '{bad}'"
            )));
        }
        if c.jobs == 0 {
            return Err(OcrPdfError::InvalidConfig("Jobs must be ≥ 1".into()));
        }
        if c.ocr_timeout.is_zero() {
            return Err(OcrPdfError::InvalidConfig(
                "OCR timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums & tool locations ───────────────────────────────────────────────

/// PDF/A part requested from the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PdfALevel {
    /// PDF/A-1b.
    PdfA1,
    /// PDF/A-2b (default).
    #[default]
    PdfA2,
}

impl PdfALevel {
    /// Numeric part used in `-dPDFA=<n>`.
    pub fn part(self) -> u8 {
        match self {
            PdfALevel::PdfA1 => 1,
            PdfALevel::PdfA2 => 2,
        }
    }
}

/// Paths (or bare names resolved via `PATH`) of every external program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Document repair tool (`mutool clean`).
    pub mutool: PathBuf,
    /// Page separation tool.
    pub pdfseparate: PathBuf,
    /// Ghostscript: rasterizer and PDF/A compositor.
    pub ghostscript: PathBuf,
    /// OCR engine.
    pub tesseract: PathBuf,
    /// Java runtime used to launch JHOVE.
    pub java: PathBuf,
    /// JHOVE application jar.
    pub jhove_jar: PathBuf,
    /// JHOVE configuration (module/profile policy).
    pub jhove_config: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mutool: "mutool".into(),
            pdfseparate: "pdfseparate".into(),
            ghostscript: "gs".into(),
            tesseract: "tesseract".into(),
            java: "java".into(),
            jhove_jar: PathBuf::from("jhove").join("bin").join("JhoveApp.jar"),
            jhove_config: PathBuf::from("jhove").join("conf").join("jhove.conf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.languages, vec!["eng"]);
        assert_eq!(c.ocr_timeout, Duration::from_secs(180));
        assert!(c.jobs >= 1);
        assert_eq!(c.pdfa_level.part(), 2);
        assert!(!c.debug_rendering);
    }

    #[test]
    fn plus_syntax_is_split() {
        let c = PipelineConfig::builder()
            .languages(["eng+deu", "fra"])
            .build()
            .unwrap();
        assert_eq!(c.languages, vec!["eng", "deu", "fra"]);
        assert_eq!(c.language_arg(), "eng+deu+fra");
    }

    #[test]
    fn rejects_zero_jobs() {
        let err = PipelineConfig::builder().jobs(0).build().unwrap_err();
        assert!(matches!(err, OcrPdfError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_languages() {
        let err = PipelineConfig::builder()
            .languages(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, OcrPdfError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_shell_metacharacters_in_language() {
        let err = PipelineConfig::builder()
            .languages(["eng;rm"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("eng;rm"));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(PipelineConfig::builder()
            .ocr_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
