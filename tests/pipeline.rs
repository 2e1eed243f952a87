//! End-to-end job tests driven by fake external tools.
//!
//! Each tool is a small `/bin/sh` script written into the test's temp dir.
//! The scripts do the minimum a real tool would (copy files, write hOCR,
//! print a validator report) and record their arguments, so the tests can
//! check the orchestration: device choice, OCR timeout fallback, merge
//! order and delivery rules.

#![cfg(unix)]

use edgequake_ocrpdf::{convert, Conformance, ExitCode, PipelineConfig, TextLayer, ToolPaths};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

const HOCR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
 <body>
  <div class='ocr_page' id='page_1' title='image "page.png"; bbox 0 0 2550 3300; ppageno 0'>
   <p class='ocr_par' title="bbox 300 300 1200 400">
    <span class='ocr_line' title="bbox 300 300 1200 400">
     <span class='ocrx_word' title='bbox 300 300 700 400; x_wconf 96'>Hello</span>
     <span class='ocrx_word' title='bbox 750 300 1200 400; x_wconf 95'>world</span>
    </span>
   </p>
  </div>
 </body>
</html>"#;

const CONFORMANT_REPORT: &str = "Jhove (Rel. 1.20.1, 2018-03-29)
 ReportingModule: PDF-hul, Rel. 1.12 (2017-10-25)
 Format: PDF
 Version: 1.4
 Status: Well-Formed and valid
 Profile: Linearized PDF, ISO PDF/A-1, Level B";

const NONCONFORMANT_REPORT: &str = "Jhove (Rel. 1.20.1, 2018-03-29)
 ReportingModule: PDF-hul, Rel. 1.12 (2017-10-25)
 Format: PDF
 Version: 1.4
 Status: Well-Formed, but not valid
 ErrorMessage: Invalid destination object";

const MALFORMED_REPORT: &str = "Jhove (Rel. 1.20.1, 2018-03-29)
 ReportingModule: PDF-hul, Rel. 1.12 (2017-10-25)
 Status: Not well-formed
 ErrorMessage: No PDF trailer";

/// Letter pages, each with one full-page 1-bit 2550×3300 image (300 dpi).
fn scanned_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id: ObjectId = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..page_count {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2550,
                "Height" => 3300,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 1,
            },
            vec![0u8; 16],
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
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
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

struct FakeTools {
    dir: tempfile::TempDir,
}

impl FakeTools {
    /// Fake tool set for a three-page document whose second page makes the
    /// OCR engine hang.
    fn new(validator_report: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        std::fs::write(root.join("scan.pdf"), scanned_pdf(3)).unwrap();
        std::fs::write(root.join("merged-fixture.pdf"), scanned_pdf(3)).unwrap();
        image::GrayImage::from_pixel(85, 110, image::Luma([255u8]))
            .save(root.join("page-fixture.png"))
            .unwrap();
        std::fs::create_dir(root.join("work")).unwrap();

        let tools = Self { dir };
        tools.script(
            "mutool",
            r#"[ "$1" = clean ] || exit 2
cp "$2" "$3""#,
        );
        tools.script(
            "pdfseparate",
            r#"for i in 1 2 3; do cp "$1" "$(printf "$2" "$i")"; done"#,
        );
        tools.script(
            "gs",
            &format!(
                r#"out=""; dev=""
for a in "$@"; do
  case "$a" in
    -sOutputFile=*) out="${{a#-sOutputFile=}}" ;;
    -sDEVICE=*) dev="${{a#-sDEVICE=}}" ;;
  esac
done
if [ "$dev" = pdfwrite ]; then
  echo "merge $*" >> "{root}/gs.log"
  cp "{root}/merged-fixture.pdf" "$out"
else
  echo "raster $dev" >> "{root}/gs.log"
  cp "{root}/page-fixture.png" "$out"
fi"#,
                root = root.display()
            ),
        );
        tools.script(
            "tesseract",
            &format!(
                r#"if [ "$1" = --list-langs ]; then
  printf 'List of available languages (2):\neng\nosd\n'
  exit 0
fi
case "$3" in
  *000002*) exec sleep 30 ;;
esac
cat > "$4.hocr" <<'HOCR'
{HOCR}
HOCR"#
            ),
        );
        tools.script(
            "java",
            &format!("cat <<'REPORT'\n{validator_report}\nREPORT"),
        );
        tools
    }

    fn script(&self, name: &str, body: &str) {
        let path = self.path(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self) -> PipelineConfig {
        let tools = ToolPaths {
            mutool: self.path("mutool"),
            pdfseparate: self.path("pdfseparate"),
            ghostscript: self.path("gs"),
            tesseract: self.path("tesseract"),
            java: self.path("java"),
            jhove_jar: self.path("JhoveApp.jar"),
            jhove_config: self.path("jhove.conf"),
        };
        PipelineConfig::builder()
            .jobs(4)
            .ocr_timeout(Duration::from_secs(2))
            .temp_dir(self.path("work"))
            .keep_temporary_files(true)
            .icc_profile(self.path("srgb.icc"))
            .tools(tools)
            .build()
            .unwrap()
    }

    fn gs_log(&self) -> String {
        std::fs::read_to_string(self.path("gs.log")).unwrap_or_default()
    }
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("'{needle}' not found in: {haystack}"))
}

#[tokio::test]
async fn three_pages_with_one_ocr_timeout() {
    let fake = FakeTools::new(CONFORMANT_REPORT);
    let output = fake.path("out").join("searchable.pdf");

    let report = convert(fake.path("scan.pdf"), &output, &fake.config())
        .await
        .expect("job should succeed");

    // Delivered, conformant, nothing half-written left behind.
    assert_eq!(report.conformance, Conformance::Conformant);
    assert!(output.exists());
    assert!(!fake.path("out").join("searchable.pdf.tmp").exists());

    // Every page is a 1-bit scan, so every page rasterises mono.
    assert_eq!(report.pages.len(), 3);
    assert!(report.pages.iter().all(|p| p.raster_device == "pngmono"));
    assert!(report.pages.iter().all(|p| p.dpi == 300.0));
    let gs_log = fake.gs_log();
    assert_eq!(gs_log.matches("raster pngmono").count(), 3);

    // Page 1 timed out and is image-only; pages 0 and 2 carry text.
    assert_eq!(report.pages[0].text_layer, TextLayer::Recognized { words: 2 });
    assert_eq!(report.pages[1].text_layer, TextLayer::Fallback);
    assert_eq!(report.pages[2].text_layer, TextLayer::Recognized { words: 2 });
    assert_eq!(report.stats.total_pages, 3);
    assert_eq!(report.stats.fallback_pages, 1);

    let work = report.work_dir.clone().expect("work dir kept");
    let page0 = std::fs::read(work.join("000001.rendered.pdf")).unwrap();
    let page1 = std::fs::read(work.join("000002.rendered.pdf")).unwrap();
    assert!(contains(&page0, b"(Hello) Tj"));
    assert!(contains(&page0, b"3 Tr"));
    assert!(!contains(&page1, b") Tj"));

    // Definition first, then pages in page order.
    let merge = gs_log
        .lines()
        .find(|l| l.starts_with("merge "))
        .expect("merge invocation logged");
    assert!(merge.contains("-sDEVICE=pdfwrite"));
    assert!(merge.contains("-dPDFA=2"));
    let def = position(merge, "pdfa_def.ps");
    let p1 = position(merge, "000001.rendered.pdf");
    let p2 = position(merge, "000002.rendered.pdf");
    let p3 = position(merge, "000003.rendered.pdf");
    assert!(def < p1 && p1 < p2 && p2 < p3, "merge order wrong: {merge}");

    let definition = std::fs::read_to_string(work.join("pdfa_def.ps")).unwrap();
    assert!(definition.contains("/GTS_PDFA1"));
}

#[tokio::test]
async fn malformed_output_is_not_delivered() {
    let fake = FakeTools::new(MALFORMED_REPORT);
    let output = fake.path("searchable.pdf");

    let err = convert(fake.path("scan.pdf"), &output, &fake.config())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), ExitCode::InvalidOutputPdfA);
    assert!(!output.exists());
    assert!(!fake.path("searchable.pdf.tmp").exists());
}

#[tokio::test]
async fn nonconformant_output_is_still_delivered() {
    let fake = FakeTools::new(NONCONFORMANT_REPORT);
    let output = fake.path("searchable.pdf");

    let report = convert(fake.path("scan.pdf"), &output, &fake.config())
        .await
        .expect("well-formed output is delivered");

    assert_eq!(report.conformance, Conformance::Nonconformant);
    assert!(output.exists());
    assert_eq!(Document::load(&output).unwrap().get_pages().len(), 3);
    assert!(!fake.path("searchable.pdf.tmp").exists());
}

#[tokio::test]
async fn user_unit_input_is_rejected_before_rasterising() {
    let fake = FakeTools::new(CONFORMANT_REPORT);
    let mut doc = Document::load_mem(&scanned_pdf(3)).unwrap();
    let second = *doc.get_pages().get(&2).unwrap();
    doc.get_object_mut(second)
        .and_then(Object::as_dict_mut)
        .unwrap()
        .set("UserUnit", 2);
    doc.save(fake.path("scaled.pdf")).unwrap();
    let output = fake.path("out.pdf");

    let err = convert(fake.path("scaled.pdf"), &output, &fake.config())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), ExitCode::InputFile);
    assert!(err.to_string().contains("UserUnit"));
    assert!(fake.gs_log().is_empty());
    assert!(!output.exists());
}

#[tokio::test]
async fn missing_language_is_rejected_before_any_stage() {
    let fake = FakeTools::new(CONFORMANT_REPORT);
    let mut config = fake.config();
    config.languages = vec!["eng".into(), "tlh".into()];

    let err = convert(fake.path("scan.pdf"), fake.path("out.pdf"), &config)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), ExitCode::BadArgs);
    assert!(err.to_string().contains("tlh"));
    assert!(fake.gs_log().is_empty());
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
