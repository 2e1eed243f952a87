//! JHOVE: PDF/A conformance validation.

use crate::config::ToolPaths;
use crate::error::OcrPdfError;
use crate::output::Conformance;
use crate::tools::{invoke, ToolInvocation, ToolLog};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Label under which validator failures are reported.
pub const PROGRAM: &str = "jhove";

static NOT_WELL_FORMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*Status:\s*Not well-formed").expect("valid regex"));
static NOT_VALID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*Status:.*not valid").expect("valid regex"));
static ERROR_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ErrorMessage").expect("valid regex"));
static PDFA_PROFILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*Profile:.*PDF/A-\d").expect("valid regex"));

/// Run the `PDF-hul` module over `candidate` and classify its report.
///
/// A non-zero validator exit is a `ToolExecution` error; the verdict itself
/// is returned as a value.
pub async fn validate(
    tools: &ToolPaths,
    log: &ToolLog,
    candidate: &Path,
) -> Result<Conformance, OcrPdfError> {
    let inv = ToolInvocation::new(PROGRAM, &tools.java)
        .arg("-jar")
        .arg(&tools.jhove_jar)
        .arg("-c")
        .arg(&tools.jhove_config)
        .arg("-m")
        .arg("PDF-hul")
        .arg(candidate);
    let result = invoke(&inv, log, None).await?;
    Ok(classify_report(&result.stdout))
}

/// Map a JHOVE text report onto a verdict.
pub fn classify_report(report: &str) -> Conformance {
    if NOT_WELL_FORMED.is_match(report) {
        Conformance::Malformed
    } else if ERROR_MESSAGE.is_match(report) || NOT_VALID.is_match(report) {
        Conformance::Nonconformant
    } else if !PDFA_PROFILE.is_match(report) {
        Conformance::Nonconformant
    } else {
        Conformance::Conformant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFORMANT: &str = "\
Jhove (Rel. 1.20.1, 2018-03-29)
 Date: 2026-10-18 10:00:00 UTC
 RepresentationInformation: out.pdf
 ReportingModule: PDF-hul, Rel. 1.12.2 (2019-12-10)
 Format: PDF
 Version: 1.7
 Status: Well-formed and valid
 Profile: Linearized PDF, ISO PDF/A-2, Level B
";

    #[test]
    fn conformant_report() {
        assert_eq!(classify_report(CONFORMANT), Conformance::Conformant);
    }

    #[test]
    fn classification_ignores_case() {
        assert_eq!(
            classify_report(" status: NOT WELL-FORMED\n"),
            Conformance::Malformed
        );
        assert_eq!(
            classify_report(" Status: Well-Formed, but Not Valid\n Profile: ISO PDF/A-1, Level B\n"),
            Conformance::Nonconformant
        );
        assert_eq!(
            classify_report(" Status: Well-formed and valid\n errormessage: bad xref\n Profile: ISO PDF/A-2\n"),
            Conformance::Nonconformant
        );
        assert_eq!(
            classify_report(" STATUS: Well-formed and valid\n profile: iso pdf/a-2, level b\n"),
            Conformance::Conformant
        );
    }

    #[test]
    fn malformed_report() {
        let r = " Format: PDF\n Status: Not well-formed\n ErrorMessage: Lexical error\n";
        assert_eq!(classify_report(r), Conformance::Malformed);
    }

    #[test]
    fn error_message_makes_nonconformant() {
        let r = format!("{CONFORMANT} ErrorMessage: Invalid outline dictionary item\n");
        assert_eq!(classify_report(&r), Conformance::Nonconformant);
    }

    #[test]
    fn well_formed_but_not_valid() {
        let r = " Status: Well-formed, but not valid\n Profile: ISO PDF/A-1, Level B\n";
        assert_eq!(classify_report(r), Conformance::Nonconformant);
    }

    #[test]
    fn valid_without_pdfa_profile() {
        let r = " Status: Well-formed and valid\n Profile: Linearized PDF\n";
        assert_eq!(classify_report(r), Conformance::Nonconformant);
    }
}
