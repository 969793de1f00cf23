//! OCR fallback for pages without a usable text layer.
//!
//! The pipeline only needs text lines from a page image, so the engine seam
//! is one method: image + language in, lines out. The built-in engine wraps
//! `pure-onnx-ocr` (PaddleOCR detection + recognition models, no native
//! ONNX runtime); callers may plug in anything else via
//! [`crate::ExtractionConfigBuilder::ocr_engine`].

use crate::config::ExtractionConfig;
use crate::error::{GradesheetError, OcrError};
use image::DynamicImage;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Recognises text lines in a rendered page.
pub trait OcrEngine: Send + Sync {
    /// Recognised lines in reading order. No positional metadata.
    fn recognize(&self, image: &DynamicImage, language: &str) -> Result<Vec<String>, OcrError>;
}

/// Run `engine` on a helper thread and wait at most `timeout`.
///
/// The image moves into the helper thread and is dropped as soon as
/// recognition returns, so at most one rendered page is alive per call. On
/// timeout the helper keeps running in the background; its result is
/// discarded.
pub fn recognize_with_timeout(
    engine: Arc<dyn OcrEngine>,
    image: DynamicImage,
    language: &str,
    timeout: Duration,
) -> Result<Vec<String>, OcrError> {
    let (tx, rx) = mpsc::channel();
    let language = language.to_string();

    std::thread::Builder::new()
        .name("ocr".into())
        .spawn(move || {
            let result = engine.recognize(&image, &language);
            drop(image);
            let _ = tx.send(result);
        })
        .map_err(|e| OcrError::Recognition(format!("failed to start OCR thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("OCR exceeded {}s, abandoning page", timeout.as_secs());
            Err(OcrError::Timeout {
                secs: timeout.as_secs(),
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(OcrError::Recognition("OCR thread panicked".into()))
        }
    }
}

/// Resolve the OCR engine: explicit engine first, then the built-in engine
/// from `ocr_model_dir`. `None` means image-only pages will be skipped.
pub fn resolve_engine(
    config: &ExtractionConfig,
) -> Result<Option<Arc<dyn OcrEngine>>, GradesheetError> {
    if let Some(ref engine) = config.ocr_engine {
        return Ok(Some(Arc::clone(engine)));
    }

    #[cfg(feature = "ocr")]
    if let Some(ref dir) = config.ocr_model_dir {
        let engine = PureOcrEngine::from_dir(dir, &config.ocr_language)
            .map_err(|e| GradesheetError::OcrEngineLoad(e.to_string()))?;
        return Ok(Some(Arc::new(engine)));
    }

    #[cfg(not(feature = "ocr"))]
    if config.ocr_model_dir.is_some() {
        warn!("ocr_model_dir is set but the `ocr` feature is disabled");
    }

    debug!("No OCR engine configured");
    Ok(None)
}

/// Model script for a language code: PaddleOCR ships one Latin model that
/// covers English and Filipino.
pub fn model_script(language: &str) -> &str {
    match language.to_ascii_lowercase().as_str() {
        "eng" | "en" | "fil" | "tl" | "latin" => "latin",
        _ => language,
    }
}

#[cfg(feature = "ocr")]
pub use pure::PureOcrEngine;

#[cfg(feature = "ocr")]
mod pure {
    use super::{model_script, OcrEngine};
    use crate::error::OcrError;
    use image::DynamicImage;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;
    use tracing::{debug, info};

    /// OCR engine backed by `pure-onnx-ocr`.
    ///
    /// Expects `det.onnx`, `<script>_rec.onnx` and `<script>_dict.txt` in the
    /// model directory, e.g. `latin_rec.onnx` for English.
    pub struct PureOcrEngine {
        engine: Mutex<pure_onnx_ocr::engine::OcrEngine>,
        script: String,
    }

    impl PureOcrEngine {
        pub fn from_dir(model_dir: &Path, language: &str) -> Result<Self, OcrError> {
            let script = model_script(language).to_string();
            let det_path = model_dir.join("det.onnx");
            let rec_path = model_dir.join(format!("{script}_rec.onnx"));
            let dict_path = model_dir.join(format!("{script}_dict.txt"));

            let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
                .det_model_path(&det_path)
                .rec_model_path(&rec_path)
                .dictionary_path(&dict_path)
                .build()
                .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

            info!(
                "Loaded pure-onnx-ocr engine ({}) from {}",
                script,
                model_dir.display()
            );

            Ok(Self {
                engine: Mutex::new(engine),
                script,
            })
        }
    }

    impl OcrEngine for PureOcrEngine {
        fn recognize(&self, image: &DynamicImage, language: &str) -> Result<Vec<String>, OcrError> {
            if model_script(language) != self.script {
                return Err(OcrError::Recognition(format!(
                    "language '{language}' requested but '{}' model is loaded",
                    self.script
                )));
            }

            let start = Instant::now();
            let engine = self
                .engine
                .lock()
                .map_err(|_| OcrError::Recognition("OCR engine lock poisoned".into()))?;
            let results = engine
                .run_from_image(image)
                .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

            let boxes: Vec<super::RecognizedBox> = results
                .iter()
                .map(|r| {
                    let (mut min_y, mut max_y, mut min_x) =
                        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY);
                    for coord in r.bounding_box.exterior().coords().take(4) {
                        min_y = min_y.min(coord.y);
                        max_y = max_y.max(coord.y);
                        min_x = min_x.min(coord.x);
                    }
                    super::RecognizedBox {
                        text: r.text.replace("[UNK]", " "),
                        x: min_x as f32,
                        top: min_y as f32,
                        bottom: max_y as f32,
                    }
                })
                .collect();

            let lines = super::group_into_lines(boxes);
            debug!(
                "OCR: {} lines in {}ms",
                lines.len(),
                start.elapsed().as_millis()
            );
            Ok(lines)
        }
    }
}

/// One recognised text box in image coordinates (y grows downward).
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedBox {
    pub text: String,
    pub x: f32,
    pub top: f32,
    pub bottom: f32,
}

impl RecognizedBox {
    fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    fn height(&self) -> f32 {
        (self.bottom - self.top).max(1.0)
    }
}

/// Merge boxes whose vertical centres lie within half a box height of each
/// other into one line, ordered top to bottom and left to right.
pub fn group_into_lines(mut boxes: Vec<RecognizedBox>) -> Vec<String> {
    boxes.retain(|b| !b.text.trim().is_empty());
    boxes.sort_by(|a, b| a.center_y().total_cmp(&b.center_y()));

    let mut lines: Vec<Vec<RecognizedBox>> = Vec::new();
    for b in boxes {
        match lines.last_mut() {
            Some(line)
                if line.last().is_some_and(|prev| {
                    (b.center_y() - prev.center_y()).abs() <= prev.height().min(b.height()) / 2.0
                }) =>
            {
                line.push(b)
            }
            _ => lines.push(vec![b]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            line.iter()
                .map(|b| b.text.trim())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}
