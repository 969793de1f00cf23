//! Page loading: open a PDF with pdfium and expose its pages lazily.
//!
//! The rest of the pipeline never touches pdfium directly. It sees a
//! [`PageSource`]: a finite, ordered sequence of pages, each of which can
//! yield its positioned text items or be rasterised on demand. Tests drive
//! the same scanning code with an in-memory source.
//!
//! pdfium is not async-safe, so everything here runs inside
//! `tokio::task::spawn_blocking` (see [`crate::extract`]).

use crate::error::{GradesheetError, PageError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// A fragment of text at a position on the page.
///
/// Coordinates are PDF user space: `x` grows to the right, `y` grows
/// upward, so the header block of a gradesheet sits at larger `y` than the
/// grade rows below it. `x` is the left edge, `y` the vertical centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

impl TextItem {
    pub fn new(text: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
        }
    }
}

/// One page as seen by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 0-based page index.
    pub index: usize,
    pub items: Vec<TextItem>,
}

impl Page {
    /// 1-based page number for logs and errors.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// A page with fewer than `min_items` text items has no usable text layer.
    pub fn is_image_only(&self, min_items: usize) -> bool {
        self.items.len() < min_items
    }
}

/// An ordered, finite collection of pages that can be read one at a time.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Positioned text items of the page at `index` (0-based).
    fn text_items(&self, index: usize) -> Result<Vec<TextItem>, PageError>;

    /// Rasterise the page at `index` at `scale` × its natural size.
    fn render(&self, index: usize, scale: f32) -> Result<DynamicImage, PageError>;

    /// Lazily iterate pages in document order.
    fn pages(&self) -> Pages<'_, Self>
    where
        Self: Sized,
    {
        Pages {
            source: self,
            next: 0,
        }
    }
}

/// Iterator returned by [`PageSource::pages`]. A page whose text layer cannot
/// be read is yielded as an error; iteration continues with the next page.
pub struct Pages<'a, S: PageSource> {
    source: &'a S,
    next: usize,
}

impl<S: PageSource> Iterator for Pages<'_, S> {
    type Item = Result<Page, PageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.page_count() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(
            self.source
                .text_items(index)
                .map(|items| Page { index, items }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.source.page_count().saturating_sub(self.next);
        (left, Some(left))
    }
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Bind to a pdfium shared library.
///
/// Search order: `$PDFIUM_LIB_PATH`, the current directory, then the system
/// library path.
pub fn bind_pdfium() -> Result<Pdfium, GradesheetError> {
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        if !dir.is_empty() {
            match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)) {
                Ok(bindings) => return Ok(Pdfium::new(bindings)),
                Err(e) => warn!("PDFIUM_LIB_PATH={} could not be bound: {:?}", dir, e),
            }
        }
    }

    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| GradesheetError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Open a PDF, mapping pdfium failures onto fatal error kinds.
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, GradesheetError> {
    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                GradesheetError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                GradesheetError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            GradesheetError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let total = document.pages().len() as usize;
    if total == 0 {
        return Err(GradesheetError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    }
    info!("PDF loaded: {} pages", total);

    Ok(document)
}

impl PageSource for PdfDocument<'_> {
    fn page_count(&self) -> usize {
        self.pages().len() as usize
    }

    fn text_items(&self, index: usize) -> Result<Vec<TextItem>, PageError> {
        let text_layer_failed = |e: PdfiumError| PageError::TextLayerFailed {
            page: index + 1,
            detail: format!("{:?}", e),
        };

        let page = self.pages().get(index as u16).map_err(text_layer_failed)?;
        let text = page.text().map_err(text_layer_failed)?;
        let segments = text.segments();

        let items: Vec<TextItem> = segments
            .iter()
            .filter_map(|segment| {
                let content = segment.text();
                let content = content.trim();
                if content.is_empty() {
                    return None;
                }
                // Vertical centre: a descender drags the bottom edge, not the middle.
                let bounds = segment.bounds();
                Some(TextItem::new(
                    content,
                    bounds.left().value,
                    (bounds.top().value + bounds.bottom().value) / 2.0,
                ))
            })
            .collect();

        debug!("Page {}: {} text items", index + 1, items.len());
        Ok(items)
    }

    fn render(&self, index: usize, scale: f32) -> Result<DynamicImage, PageError> {
        let render_failed = |e: PdfiumError| PageError::RenderFailed {
            page: index + 1,
            detail: format!("{:?}", e),
        };

        let page = self.pages().get(index as u16).map_err(render_failed)?;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(render_failed)?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}
