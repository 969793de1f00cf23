//! Pipeline stages for gradesheet extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; only [`load`] touches pdfium and only [`llm`] touches the network.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ load ─▶ scan ──────────────────────▶ chunk ─▶ llm ─▶ merge
//!                   ├─ headers (page 1)              (backend,   (dedup)
//!                   ├─ lines   (text layer)           postprocess)
//!                   └─ ocr     (image-only pages)
//! ```
//!
//! 1. [`input`]: canonicalise a path, URL or byte buffer to a local file
//! 2. [`load`]: bind pdfium, open the document, expose a [`load::PageSource`]
//! 3. [`scan`]: walk pages once; runs in `spawn_blocking`
//!    * [`headers`]: infer subject columns from page-1 geometry
//!    * [`lines`]: rebuild rows, track the gender section, drop boilerplate
//!    * [`ocr`]: recognise lines on pages without a text layer
//! 4. [`chunk`]: batch tagged rows into backend requests
//! 5. [`llm`]: send each chunk with timeout and bounded retries
//! 6. [`postprocess`]: pull the JSON array out of the response and normalise records
//! 7. [`merge`]: deduplicate students across chunks

pub mod chunk;
pub mod headers;
pub mod input;
pub mod lines;
pub mod llm;
pub mod load;
pub mod merge;
pub mod ocr;
pub mod postprocess;
pub mod scan;
