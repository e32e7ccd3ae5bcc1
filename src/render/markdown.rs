//! Markdown to styled spans.
//!
//! Converts the assistant's markdown into a flat list of [`RenderSpan`]s that
//! any display layer can paint. Rendering is line-driven: a small block state
//! machine tracks fenced code and pending table rows across lines, and each
//! line's text goes through an inline tokenizer.
//!
//! Block classification, in priority order: heading, table, blockquote,
//! horizontal rule, unordered list, ordered list, plain. Inside a line,
//! delimiters are matched in this order: `***`, `**`, `*` or `_`, backtick
//! code, `~~`, `[label](url)`. An unterminated delimiter is kept as literal
//! text. Newlines are emitted as plain spans and adjacent spans with equal
//! style are merged, so markup-free input round-trips exactly.

use serde::Serialize;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Visual style of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStyle {
    Plain,
    Bold,
    Italic,
    BoldItalic,
    Strikethrough,
    InlineCode,
    CodeBlock,
    /// Heading level 1-6.
    Header(u8),
    /// List item text and bullet, nested `depth` levels deep.
    ListItem { depth: u8 },
    Blockquote,
    /// Link label; the URL is dropped.
    Link,
    TableCell,
    HorizontalRule,
}

/// A run of text in a single style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSpan {
    pub text: String,
    pub style: SpanStyle,
}

impl RenderSpan {
    pub fn new(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// Render a complete markdown text. Each call starts from fresh state.
pub fn render(text: &str) -> Vec<RenderSpan> {
    let mut sink = SpanSink::default();
    let mut blocks = BlockRenderer::default();
    for piece in text.split_inclusive('\n') {
        match piece.strip_suffix('\n') {
            Some(line) => blocks.feed_line(line, true, &mut sink),
            None => blocks.feed_line(piece, false, &mut sink),
        }
    }
    blocks.finish(&mut sink);
    sink.into_spans()
}

/// Concatenate the text of all spans.
pub fn plain_text(spans: &[RenderSpan]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

// ─── Span Sink ──────────────────────────────────────────────────────────────

/// Output buffer that merges adjacent spans of equal style.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpanSink {
    spans: Vec<RenderSpan>,
}

impl SpanSink {
    pub(crate) fn push(&mut self, text: &str, style: SpanStyle) {
        if text.is_empty() {
            return;
        }
        match self.spans.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => self.spans.push(RenderSpan::new(text, style)),
        }
    }

    pub(crate) fn spans(&self) -> &[RenderSpan] {
        &self.spans
    }

    pub(crate) fn into_spans(self) -> Vec<RenderSpan> {
        self.spans
    }
}

// ─── Block State Machine ────────────────────────────────────────────────────

/// Line-at-a-time block classifier.
///
/// State carried between lines: whether we are inside a code fence, and
/// pipe-containing lines that may still turn out to be a table.
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockRenderer {
    in_fence: bool,
    pending_table: Vec<(String, bool)>,
}

impl BlockRenderer {
    /// Consume one line (without its `\n`). `newline` says whether it had one.
    pub(crate) fn feed_line(&mut self, line: &str, newline: bool, out: &mut SpanSink) {
        if self.in_fence {
            if is_fence(line) {
                self.in_fence = false;
            } else {
                out.push(line, SpanStyle::CodeBlock);
                if newline {
                    out.push("\n", SpanStyle::CodeBlock);
                }
            }
            return;
        }

        if is_fence(line) {
            self.flush_table(out);
            self.in_fence = true;
            return;
        }

        if is_table_candidate(line) {
            self.pending_table.push((line.to_string(), newline));
            return;
        }

        self.flush_table(out);
        render_block_line(line, newline, out);
    }

    /// Flush state at end of input.
    pub(crate) fn finish(&mut self, out: &mut SpanSink) {
        self.flush_table(out);
    }

    fn flush_table(&mut self, out: &mut SpanSink) {
        if self.pending_table.is_empty() {
            return;
        }
        let rows = std::mem::take(&mut self.pending_table);

        let is_table = rows.len() >= 2 && is_separator_row(&rows[1].0);
        if !is_table {
            for (line, newline) in &rows {
                render_block_line(line, *newline, out);
            }
            return;
        }

        for (i, (line, newline)) in rows.iter().enumerate() {
            if i == 1 {
                continue;
            }
            for (col, cell) in split_row(line).into_iter().enumerate() {
                if col > 0 {
                    out.push(" │ ", SpanStyle::Plain);
                }
                render_inline(cell.trim(), SpanStyle::TableCell, out);
            }
            if *newline {
                out.push("\n", SpanStyle::Plain);
            }
        }
    }
}

/// Render a line that is not part of a fence or table.
fn render_block_line(line: &str, newline: bool, out: &mut SpanSink) {
    let trimmed = line.trim_start();

    if let Some((level, text)) = heading(line) {
        render_inline(text, SpanStyle::Header(level), out);
    } else if let Some(rest) = trimmed.strip_prefix('>') {
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        render_inline(rest, SpanStyle::Blockquote, out);
    } else if is_horizontal_rule(trimmed) {
        out.push(trimmed.trim_end(), SpanStyle::HorizontalRule);
    } else if let Some(rest) = unordered_item(trimmed) {
        let depth = list_depth(line);
        let style = SpanStyle::ListItem { depth };
        out.push(&format!("{}• ", "  ".repeat(depth as usize)), style);
        render_inline(rest, style, out);
    } else if let Some((number, rest)) = ordered_item(trimmed) {
        let depth = list_depth(line);
        let style = SpanStyle::ListItem { depth };
        out.push(&format!("{}{number}. ", "  ".repeat(depth as usize)), style);
        render_inline(rest, style, out);
    } else {
        render_inline(line, SpanStyle::Plain, out);
    }

    if newline {
        out.push("\n", SpanStyle::Plain);
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// `#`-prefixed heading: 1-6 hashes followed by a space or end of line.
fn heading(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() {
        return Some((hashes as u8, ""));
    }
    rest.strip_prefix(' ')
        .map(|text| (hashes as u8, text.trim_end()))
}

fn is_table_candidate(line: &str) -> bool {
    line.contains('|') && heading(line).is_none()
}

/// `|---|:---:|` style separator between table header and body.
fn is_separator_row(line: &str) -> bool {
    let cells = split_row(line);
    !cells.is_empty()
        && cells.iter().all(|cell| {
            let cell = cell.trim();
            cell.contains('-') && cell.chars().all(|c| c == '-' || c == ':')
        })
}

fn split_row(line: &str) -> Vec<&str> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').collect()
}

/// Three or more of the same `-`, `*` or `_`, optionally space-separated.
fn is_horizontal_rule(trimmed: &str) -> bool {
    let mut marks = trimmed.chars().filter(|c| !c.is_whitespace());
    let Some(first) = marks.next() else {
        return false;
    };
    if !matches!(first, '-' | '*' | '_') {
        return false;
    }
    let mut count = 1;
    for c in marks {
        if c != first {
            return false;
        }
        count += 1;
    }
    count >= 3
}

fn unordered_item(trimmed: &str) -> Option<&str> {
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| trimmed.strip_prefix(marker))
}

fn ordered_item(trimmed: &str) -> Option<(&str, &str)> {
    let digits = trimmed.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    trimmed[digits..]
        .strip_prefix(". ")
        .map(|rest| (&trimmed[..digits], rest))
}

/// Two spaces of indentation per nesting level.
fn list_depth(line: &str) -> u8 {
    let indent = line.len() - line.trim_start_matches(' ').len();
    (indent / 2).min(u8::MAX as usize) as u8
}

// ─── Inline Tokenizer ───────────────────────────────────────────────────────

/// Tokenize one line of text. Undelimited runs take `base` style.
fn render_inline(text: &str, base: SpanStyle, out: &mut SpanSink) {
    let mut rest = text;
    let mut plain_start = 0;
    let mut pos = 0;
    let mut prev: Option<char> = None;

    while let Some(c) = rest.chars().next() {
        if let Some((inner, style, consumed)) = match_delimited(rest, prev) {
            out.push(&text[plain_start..pos], base);
            out.push(inner, style);
            prev = rest[..consumed].chars().next_back();
            rest = &rest[consumed..];
            pos += consumed;
            plain_start = pos;
        } else {
            prev = Some(c);
            rest = &rest[c.len_utf8()..];
            pos += c.len_utf8();
        }
    }

    out.push(&text[plain_start..], base);
}

/// Try to match a delimited run at the start of `rest`.
///
/// Returns the inner text, its style, and the number of bytes consumed.
fn match_delimited(rest: &str, prev: Option<char>) -> Option<(&str, SpanStyle, usize)> {
    if rest.starts_with("***") {
        if let Some(m) = enclosed(rest, "***", SpanStyle::BoldItalic) {
            return Some(m);
        }
    }
    if rest.starts_with("**") {
        if let Some(m) = enclosed(rest, "**", SpanStyle::Bold) {
            return Some(m);
        }
    }
    if rest.starts_with('*') {
        return emphasis(rest, '*');
    }
    if rest.starts_with('_') && !prev.is_some_and(|p| p.is_alphanumeric()) {
        return emphasis(rest, '_');
    }
    if rest.starts_with('`') {
        return enclosed(rest, "`", SpanStyle::InlineCode);
    }
    if rest.starts_with("~~") {
        return enclosed(rest, "~~", SpanStyle::Strikethrough);
    }
    if rest.starts_with('[') {
        return link(rest);
    }
    None
}

/// `<delim>inner<delim>` with non-empty inner.
fn enclosed<'a>(
    rest: &'a str,
    delim: &str,
    style: SpanStyle,
) -> Option<(&'a str, SpanStyle, usize)> {
    let body = &rest[delim.len()..];
    let end = body.find(delim)?;
    if end == 0 {
        return None;
    }
    Some((&body[..end], style, delim.len() * 2 + end))
}

/// Single `*` or `_` emphasis.
///
/// The inner text may not start or end with whitespace. A closing `_` must
/// not be followed by an alphanumeric, so `snake_case_name` stays literal.
fn emphasis(rest: &str, mark: char) -> Option<(&str, SpanStyle, usize)> {
    let body = &rest[1..];
    let end = body.find(mark)?;
    let inner = &body[..end];
    if inner.is_empty()
        || inner.starts_with(char::is_whitespace)
        || inner.ends_with(char::is_whitespace)
    {
        return None;
    }
    if mark == '_' && body[end + 1..].chars().next().is_some_and(|c| c.is_alphanumeric()) {
        return None;
    }
    Some((inner, SpanStyle::Italic, end + 2))
}

/// `[label](url)` rendered as the label.
fn link(rest: &str) -> Option<(&str, SpanStyle, usize)> {
    let close = rest.find(']')?;
    let label = &rest[1..close];
    if label.is_empty() {
        return None;
    }
    let after = rest[close + 1..].strip_prefix('(')?;
    let url_end = after.find(')')?;
    Some((label, SpanStyle::Link, close + 2 + url_end + 1))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
