//! Incremental rendering for streamed assistant text.
//!
//! Completed lines are rendered once and their spans kept; only the trailing
//! partial line is re-rendered on every [`StreamingRenderer::spans`] call.
//! For any chunking of a text the final spans equal [`render`] of the whole.
//!
//! [`render`]: super::markdown::render

use super::markdown::{BlockRenderer, RenderSpan, SpanSink};

/// Accumulates streamed text and renders it incrementally.
#[derive(Debug, Clone, Default)]
pub struct StreamingRenderer {
    buffer: String,
    /// Byte offset of the first uncommitted character in `buffer`.
    committed_len: usize,
    committed: SpanSink,
    blocks: BlockRenderer,
}

impl StreamingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and commit every line it completes.
    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        while let Some(offset) = self.buffer[self.committed_len..].find('\n') {
            let end = self.committed_len + offset;
            self.blocks
                .feed_line(&self.buffer[self.committed_len..end], true, &mut self.committed);
            self.committed_len = end + 1;
        }
    }

    /// Spans for everything received so far.
    ///
    /// The partial tail is rendered on a copy of the block state, so this
    /// can be called after every chunk without disturbing later output.
    pub fn spans(&self) -> Vec<RenderSpan> {
        let mut sink = self.committed.clone();
        let mut blocks = self.blocks.clone();
        if self.committed_len < self.buffer.len() {
            blocks.feed_line(&self.buffer[self.committed_len..], false, &mut sink);
        }
        blocks.finish(&mut sink);
        sink.into_spans()
    }

    /// Spans for completed lines only.
    ///
    /// Append-only in text: later commits may extend the last span (equal
    /// styles merge) but never change anything before it.
    pub fn committed_spans(&self) -> &[RenderSpan] {
        self.committed.spans()
    }

    /// Raw text received so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
