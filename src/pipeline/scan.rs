//! Document scan: every page, in order, into one list of tagged rows.
//!
//! This is the synchronous half of the pipeline. It runs on one blocking
//! thread because pdfium is not async-safe, and touches each page once:
//!
//! 1. Page 1 items feed the header locator and grade-level detection
//! 2. Pages with a text layer are rebuilt into rows from item positions
//! 3. Image-only pages are rasterised and handed to the OCR engine; the
//!    raster is dropped as soon as recognition returns
//! 4. Rows from both paths go through the same [`LineExtractor`], so the
//!    gender section carries across pages regardless of how they were read
//!
//! Page-level failures never abort the scan. They are logged, collected in
//! [`ScannedDocument::page_errors`], and the page contributes no rows. Once an
//! OCR call times out, later image-only pages are not rendered at all and are
//! recorded as [`PageError::OcrSkipped`].

use crate::config::ExtractionConfig;
use crate::error::{OcrError, PageError};
use crate::pipeline::headers::{detect_grade_level, locate_headers};
use crate::pipeline::lines::{reconstruct_rows, LineExtractor, TaggedLine};
use crate::pipeline::load::PageSource;
use crate::pipeline::ocr::{recognize_with_timeout, OcrEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How one page was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    /// 1-based page number.
    pub page: usize,
    pub text_items: usize,
    /// Routed through OCR.
    pub ocr: bool,
    /// Data rows kept from this page.
    pub rows: usize,
}

/// Everything the scan learned about a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedDocument {
    pub page_count: usize,
    /// Labels found on page 1, `None` when the layout signal was too weak.
    pub headers: Option<Vec<String>>,
    /// Grade level printed on page 1, e.g. `"GRADE 7"`.
    pub grade_level: Option<String>,
    pub lines: Vec<TaggedLine>,
    pub pages: Vec<PageSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_errors: Vec<PageError>,
    pub duration_ms: u64,
}

impl ScannedDocument {
    pub fn ocr_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.ocr).count()
    }
}

/// Scan every page of `source`.
///
/// `ocr` is the engine for image-only pages; with `None` those pages are
/// recorded as [`PageError::OcrUnavailable`] and skipped.
pub fn scan_document<S: PageSource>(
    source: &S,
    ocr: Option<&Arc<dyn OcrEngine>>,
    config: &ExtractionConfig,
) -> ScannedDocument {
    let start = Instant::now();
    let mut scan = ScannedDocument {
        page_count: source.page_count(),
        ..Default::default()
    };
    let mut extractor = LineExtractor::new();
    // An abandoned OCR call keeps the engine and its raster busy; later pages
    // would only queue behind it.
    let mut stalled_page: Option<usize> = None;

    for page in source.pages() {
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                warn!("{}", e);
                scan.page_errors.push(e);
                continue;
            }
        };

        if page.index == 0 {
            scan.headers = locate_headers(&page.items, &config.header);
            scan.grade_level = detect_grade_level(&page.items);
            match scan.headers {
                Some(ref h) => info!("Detected {} subject headers: {:?}", h.len(), h),
                None => debug!("Header detection found no usable columns on page 1"),
            }
        }

        let image_only = page.is_image_only(config.min_text_items);
        let rows = if image_only {
            debug!(
                "Page {}: {} text items, routing to OCR",
                page.number(),
                page.items.len()
            );
            let result = match stalled_page {
                Some(stalled) => Err(PageError::OcrSkipped {
                    page: page.number(),
                    stalled_page: stalled,
                }),
                None => ocr_page(source, page.index, ocr, config),
            };
            match result {
                Ok(lines) => extractor.push_rows(page.number(), lines, config),
                Err(e) => {
                    if let PageError::OcrTimedOut { page: stalled, .. } = &e {
                        stalled_page = Some(*stalled);
                    }
                    warn!("{}", e);
                    scan.page_errors.push(e);
                    0
                }
            }
        } else {
            let rows = reconstruct_rows(&page.items, config.row_bucket);
            extractor.push_rows(page.number(), rows, config)
        };

        debug!("Page {}: kept {} rows", page.number(), rows);
        scan.pages.push(PageSummary {
            page: page.number(),
            text_items: page.items.len(),
            ocr: image_only,
            rows,
        });
    }

    scan.lines = extractor.into_lines();
    scan.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Scanned {} pages ({} via OCR): {} rows in {}ms",
        scan.page_count,
        scan.ocr_pages(),
        scan.lines.len(),
        scan.duration_ms
    );
    scan
}

/// Rasterise one page and recognise its lines.
fn ocr_page<S: PageSource>(
    source: &S,
    index: usize,
    ocr: Option<&Arc<dyn OcrEngine>>,
    config: &ExtractionConfig,
) -> Result<Vec<String>, PageError> {
    let page = index + 1;
    let engine = ocr.ok_or(PageError::OcrUnavailable { page })?;
    let image = source.render(index, config.ocr_scale)?;

    let lines = recognize_with_timeout(
        Arc::clone(engine),
        image,
        &config.ocr_language,
        config.ocr_timeout(),
    )
    .map_err(|e| match e {
        OcrError::Timeout { secs } => PageError::OcrTimedOut { page, secs },
        other => PageError::OcrFailed {
            page,
            detail: other.to_string(),
        },
    })?;

    Ok(lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Gender;
    use crate::pipeline::load::tests::FakeSource;
    use crate::pipeline::load::TextItem;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns the same lines for every page and counts calls.
    struct ScriptedOcr {
        lines: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedOcr {
        fn new(lines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl OcrEngine for ScriptedOcr {
        fn recognize(&self, _image: &DynamicImage, lang: &str) -> Result<Vec<String>, OcrError> {
            assert_eq!(lang, "eng");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.lines.clone())
        }
    }

    struct FailingOcr;

    impl OcrEngine for FailingOcr {
        fn recognize(&self, _image: &DynamicImage, _lang: &str) -> Result<Vec<String>, OcrError> {
            Err(OcrError::Recognition("model exploded".into()))
        }
    }

    struct HangingOcr;

    impl OcrEngine for HangingOcr {
        fn recognize(&self, _image: &DynamicImage, _lang: &str) -> Result<Vec<String>, OcrError> {
            std::thread::sleep(Duration::from_secs(3));
            Ok(vec![])
        }
    }

    /// Page 1 of a three-subject gradesheet: labels at y=700, eight students.
    fn gradesheet_page() -> Vec<TextItem> {
        let mut items = vec![
            TextItem::new("GRADE 7 - SAMPAGUITA", 20.0, 760.0),
            TextItem::new("LEARNER'S NAME", 20.0, 700.0),
            TextItem::new("MATH", 200.0, 700.0),
            TextItem::new("SCIENCE", 260.0, 700.0),
            TextItem::new("ENGLISH", 320.0, 700.0),
            TextItem::new("MALE", 20.0, 680.0),
        ];
        for i in 0..8 {
            let y = 660.0 - i as f32 * 20.0;
            if i == 4 {
                items.push(TextItem::new("FEMALE", 20.0, y + 10.0));
            }
            items.push(TextItem::new(format!("{}. STUDENT{}, NAME", i + 1, i), 20.0, y));
            items.push(TextItem::new(format!("{}", 80 + i), 200.0, y));
            items.push(TextItem::new(format!("{}", 85 + i), 260.0, y));
            items.push(TextItem::new(format!("{}", 70 + i), 320.0, y));
        }
        items
    }

    #[test]
    fn text_page_yields_headers_rows_and_gender() {
        let source = FakeSource::new(vec![gradesheet_page()]);
        let scan = scan_document(&source, None, &ExtractionConfig::default());

        assert_eq!(
            scan.headers,
            Some(vec!["MATH".into(), "SCIENCE".into(), "ENGLISH".into()])
        );
        assert_eq!(scan.grade_level.as_deref(), Some("GRADE 7"));
        assert_eq!(scan.lines.len(), 9);
        // The class title survives as a row; the backend is told to ignore it.
        assert_eq!(scan.lines[0].text, "GRADE 7 - SAMPAGUITA");
        assert_eq!(scan.lines[1].text, "1. STUDENT0, NAME | 80 | 85 | 70");
        assert_eq!(scan.lines[4].gender, Gender::Male);
        assert_eq!(scan.lines[5].gender, Gender::Female);
        assert_eq!(source.renders.get(), 0);
        assert!(scan.page_errors.is_empty());
    }

    #[test]
    fn sparse_page_routes_to_ocr() {
        let ocr = ScriptedOcr::new(&["  9. REYES, ANA 91 89 90 ", "", "x"]);
        let engine: Arc<dyn OcrEngine> = ocr.clone();
        let sparse = vec![TextItem::new("scan", 0.0, 0.0); 4];
        let source = FakeSource::new(vec![gradesheet_page(), sparse]);

        let scan = scan_document(&source, Some(&engine), &ExtractionConfig::default());

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.renders.get(), 1);
        assert_eq!(scan.ocr_pages(), 1);
        let last = scan.lines.last().unwrap();
        assert_eq!(last.text, "9. REYES, ANA 91 89 90");
        assert_eq!(last.page, 2);
        // Gender context from page 1 carries into the OCR page.
        assert_eq!(last.gender, Gender::Female);
    }

    #[test]
    fn image_only_page_without_engine_is_recorded() {
        let source = FakeSource::new(vec![gradesheet_page(), vec![]]);
        let scan = scan_document(&source, None, &ExtractionConfig::default());
        assert_eq!(scan.page_errors, vec![PageError::OcrUnavailable { page: 2 }]);
        assert_eq!(scan.lines.len(), 9);
        assert_eq!(source.renders.get(), 0);
    }

    #[test]
    fn ocr_failure_skips_only_that_page() {
        let engine: Arc<dyn OcrEngine> = Arc::new(FailingOcr);
        let source = FakeSource::new(vec![vec![], gradesheet_page()]);
        let scan = scan_document(&source, Some(&engine), &ExtractionConfig::default());

        assert!(matches!(
            scan.page_errors.as_slice(),
            [PageError::OcrFailed { page: 1, .. }]
        ));
        assert_eq!(scan.lines.len(), 9);
        // Page 1 was image-only, so no headers.
        assert_eq!(scan.headers, None);
    }

    #[test]
    fn ocr_timeout_is_its_own_error() {
        let engine: Arc<dyn OcrEngine> = Arc::new(HangingOcr);
        let config = ExtractionConfig::builder().ocr_timeout_secs(1).build().unwrap();
        let source = FakeSource::new(vec![vec![]]);
        let scan = scan_document(&source, Some(&engine), &config);
        assert_eq!(
            scan.page_errors,
            vec![PageError::OcrTimedOut { page: 1, secs: 1 }]
        );
    }

    /// Holds its lock for the whole call, like the built-in engine.
    struct LockedSlowOcr {
        lock: std::sync::Mutex<()>,
        calls: AtomicUsize,
    }

    impl OcrEngine for LockedSlowOcr {
        fn recognize(&self, _image: &DynamicImage, _lang: &str) -> Result<Vec<String>, OcrError> {
            let _guard = self.lock.lock().unwrap();
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                std::thread::sleep(Duration::from_secs(3));
            }
            Ok(vec!["1. CRUZ, JUAN | 90 | 85".into()])
        }
    }

    #[test]
    fn ocr_stops_after_a_timed_out_page() {
        let ocr = Arc::new(LockedSlowOcr {
            lock: std::sync::Mutex::new(()),
            calls: AtomicUsize::new(0),
        });
        let engine: Arc<dyn OcrEngine> = ocr.clone();
        let config = ExtractionConfig::builder().ocr_timeout_secs(1).build().unwrap();
        let source = FakeSource::new(vec![vec![], vec![], gradesheet_page(), vec![]]);

        let scan = scan_document(&source, Some(&engine), &config);

        assert_eq!(
            scan.page_errors,
            vec![
                PageError::OcrTimedOut { page: 1, secs: 1 },
                PageError::OcrSkipped { page: 2, stalled_page: 1 },
                PageError::OcrSkipped { page: 4, stalled_page: 1 },
            ]
        );
        // Only the stalled page was rasterised and handed to the engine.
        assert_eq!(source.renders.get(), 1);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        // Text pages are unaffected.
        assert_eq!(scan.pages[2].rows, 9);
    }

    #[test]
    fn page_summaries_track_each_page() {
        let engine: Arc<dyn OcrEngine> = ScriptedOcr::new(&["10. CRUZ, JUAN | 90"]);
        let source = FakeSource::new(vec![gradesheet_page(), vec![]]);
        let scan = scan_document(&source, Some(&engine), &ExtractionConfig::default());
        assert_eq!(scan.pages.len(), 2);
        assert!(!scan.pages[0].ocr);
        assert_eq!(scan.pages[0].rows, 9);
        assert_eq!(
            scan.pages[1],
            PageSummary {
                page: 2,
                text_items: 0,
                ocr: true,
                rows: 1
            }
        );
    }
}
