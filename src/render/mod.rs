//! Markdown rendering into styled spans for the display layer.
//!
//! - `markdown`: One-shot rendering of a complete text
//! - `streaming`: Incremental rendering of streamed text

pub mod markdown;
pub mod streaming;

pub use markdown::{plain_text, render, RenderSpan, SpanStyle};
pub use streaming::StreamingRenderer;
