//! Markdown-aware splitting of long replies into Discord-sized chunks.
//!
//! Discord renders a subset of markdown; cutting a message in the middle of
//! `**bold**` or a code fence leaves both halves rendered wrong. The splitter
//! finds paired-markup spans first and only cuts outside them, preferring
//! sentence ends, then line ends, then whitespace. A span longer than the
//! limit on its own is the one case where a cut inside markup is allowed.
//!
//! All positions and lengths are counted in `char`s, matching how Discord
//! counts its 2000-character limit.

use std::cmp::Reverse;

pub use daia_core::config::DISCORD_MESSAGE_LIMIT as DEFAULT_MAX_CHARS;

/// Paired markup recognised by the splitter, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    CodeBlock,
    Spoiler,
    Strikethrough,
    Underline,
    Bold,
    InlineCode,
    Italic,
    ItalicUnderscore,
}

impl SyntaxKind {
    pub const PRECEDENCE: [SyntaxKind; 8] = [
        SyntaxKind::CodeBlock,
        SyntaxKind::Spoiler,
        SyntaxKind::Strikethrough,
        SyntaxKind::Underline,
        SyntaxKind::Bold,
        SyntaxKind::InlineCode,
        SyntaxKind::Italic,
        SyntaxKind::ItalicUnderscore,
    ];

    pub fn delimiter(self) -> &'static str {
        match self {
            SyntaxKind::CodeBlock => "```",
            SyntaxKind::Spoiler => "||",
            SyntaxKind::Strikethrough => "~~",
            SyntaxKind::Underline => "__",
            SyntaxKind::Bold => "**",
            SyntaxKind::InlineCode => "`",
            SyntaxKind::Italic => "*",
            SyntaxKind::ItalicUnderscore => "_",
        }
    }
}

/// A paired-markup span `[start, end)` in char offsets, delimiters included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxBoundary {
    pub start: usize,
    pub end: usize,
    pub kind: SyntaxKind,
}

impl SyntaxBoundary {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when a cut at `pos` would separate the delimiters.
    pub fn splits_at(&self, pos: usize) -> bool {
        self.start < pos && pos < self.end
    }

    fn overlaps(&self, other: &SyntaxBoundary) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Markdown constructs that only mean something at the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    Heading,
    BlockQuote,
    UnorderedList,
    OrderedList,
}

/// A line-start marker such as `## ` spanning `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMarker {
    pub start: usize,
    pub end: usize,
    pub kind: LineFormat,
}

impl LineMarker {
    // Cutting right after the marker's space would orphan it from its text.
    fn splits_at(&self, pos: usize) -> bool {
        self.start < pos && pos <= self.end
    }
}

/// Splits text into chunks no longer than `max_chars`.
#[derive(Debug, Clone, Copy)]
pub struct MarkupSplitter {
    max_chars: usize,
    preserve_formatting: bool,
}

impl Default for MarkupSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl MarkupSplitter {
    /// # Panics
    /// If `max_chars` is zero.
    pub fn new(max_chars: usize) -> Self {
        assert!(max_chars > 0, "MarkupSplitter requires a positive limit");
        Self {
            max_chars,
            preserve_formatting: true,
        }
    }

    /// Whitespace-only splitting that ignores markup.
    pub fn plain(max_chars: usize) -> Self {
        Self {
            preserve_formatting: false,
            ..Self::new(max_chars)
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split `text` into chunks. Text that already fits comes back unchanged
    /// as a single chunk; blank text yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.max_chars {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut rest: &[char] = &chars;

        while rest.len() > self.max_chars {
            let cut = match self.find_cut(rest) {
                0 => self.max_chars,
                n => n,
            };
            let head: String = rest[..cut].iter().collect();
            let head = head.trim_end();
            if !head.is_empty() {
                chunks.push(head.to_string());
            }
            rest = trim_start(&rest[cut..]);
        }

        let tail: String = rest.iter().collect();
        let tail = tail.trim_end();
        if !tail.is_empty() {
            chunks.push(tail.to_string());
        }
        chunks
    }

    fn find_cut(&self, text: &[char]) -> usize {
        let target = self.max_chars;
        if !self.preserve_formatting {
            return CutSearch::new(text, Vec::new(), Vec::new()).plain_before(target);
        }

        let boundaries = boundaries_in(text);
        let markers = line_markers_in(text);

        let crossing = boundaries.iter().find(|b| b.splits_at(target)).copied();
        match crossing {
            Some(span) if span.len() > self.max_chars => {
                // Oversized span: a cut inside it is unavoidable, but still
                // prefer a natural break before the limit.
                let others = boundaries.into_iter().filter(|b| *b != span).collect();
                CutSearch::new(text, others, markers).best_before(target)
            }
            Some(span) => CutSearch::new(text, boundaries, markers).best_before(span.start),
            None => CutSearch::new(text, boundaries, markers).best_before(target),
        }
    }
}

/// Split with the default Discord limit.
pub fn split_message(text: &str) -> Vec<String> {
    MarkupSplitter::default().split(text)
}

/// Non-overlapping paired-markup spans in `text`, sorted by start offset.
pub fn find_syntax_boundaries(text: &str) -> Vec<SyntaxBoundary> {
    let chars: Vec<char> = text.chars().collect();
    boundaries_in(&chars)
}

/// Line-start markdown markers in `text`.
pub fn find_line_markers(text: &str) -> Vec<LineMarker> {
    let chars: Vec<char> = text.chars().collect();
    line_markers_in(&chars)
}

fn boundaries_in(text: &[char]) -> Vec<SyntaxBoundary> {
    let mut all = Vec::new();
    for kind in SyntaxKind::PRECEDENCE {
        let delim: Vec<char> = kind.delimiter().chars().collect();
        let mut pos = 0;
        while let Some(open) = find_seq(text, &delim, pos) {
            let Some(close) = find_seq(text, &delim, open + delim.len()) else {
                break;
            };
            let end = close + delim.len();
            all.push(SyntaxBoundary {
                start: open,
                end,
                kind,
            });
            pos = end;
        }
    }

    // Stable sort keeps precedence order among spans with identical extent.
    all.sort_by_key(|b| (b.start, Reverse(b.end)));

    let mut kept: Vec<SyntaxBoundary> = Vec::with_capacity(all.len());
    for b in all {
        if !kept.iter().any(|k| k.overlaps(&b)) {
            kept.push(b);
        }
    }
    kept
}

fn line_markers_in(text: &[char]) -> Vec<LineMarker> {
    let mut markers = Vec::new();
    let line_starts =
        std::iter::once(0).chain(text.iter().enumerate().filter(|(_, c)| **c == '\n').map(|(i, _)| i + 1));

    for start in line_starts {
        let mut i = start;
        while i < text.len() && (text[i] == ' ' || text[i] == '\t') {
            i += 1;
        }
        if let Some((end, kind)) = marker_at(text, i) {
            markers.push(LineMarker { start, end, kind });
        }
    }
    markers
}

fn marker_at(text: &[char], i: usize) -> Option<(usize, LineFormat)> {
    let at = |j: usize| text.get(j).copied();
    match at(i)? {
        '#' => {
            let hashes = text[i..].iter().take_while(|c| **c == '#').count();
            (hashes <= 6 && at(i + hashes) == Some(' '))
                .then_some((i + hashes + 1, LineFormat::Heading))
        }
        '>' if at(i + 1) == Some(' ') => Some((i + 2, LineFormat::BlockQuote)),
        '-' | '*' | '+' if at(i + 1) == Some(' ') => Some((i + 2, LineFormat::UnorderedList)),
        c if c.is_ascii_digit() => {
            let digits = text[i..].iter().take_while(|c| c.is_ascii_digit()).count();
            (at(i + digits) == Some('.') && at(i + digits + 1) == Some(' '))
                .then_some((i + digits + 2, LineFormat::OrderedList))
        }
        _ => None,
    }
}

fn find_seq(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn trim_start(text: &[char]) -> &[char] {
    let skip = text.iter().take_while(|c| c.is_whitespace()).count();
    &text[skip..]
}

/// Cut-point search over one remaining slice of text.
struct CutSearch<'a> {
    text: &'a [char],
    boundaries: Vec<SyntaxBoundary>,
    markers: Vec<LineMarker>,
}

impl<'a> CutSearch<'a> {
    fn new(text: &'a [char], boundaries: Vec<SyntaxBoundary>, markers: Vec<LineMarker>) -> Self {
        Self {
            text,
            boundaries,
            markers,
        }
    }

    fn is_safe(&self, pos: usize) -> bool {
        !self.boundaries.iter().any(|b| b.splits_at(pos))
            && !self.markers.iter().any(|m| m.splits_at(pos))
    }

    /// Best cut at or before `max_pos`: sentence end, line end, whitespace,
    /// then `max_pos` itself.
    fn best_before(&self, max_pos: usize) -> usize {
        if max_pos == 0 {
            return 0;
        }
        let max_pos = max_pos.min(self.text.len());

        let sentence = (0..max_pos).rev().find(|&i| {
            matches!(self.text[i], '.' | '!' | '?')
                && self.text.get(i + 1).map_or(true, |c| c.is_whitespace())
                && self.is_safe(i + 1)
        });
        if let Some(i) = sentence {
            return i + 1;
        }

        let line_end = (0..max_pos)
            .rev()
            .find(|&i| self.text[i] == '\n' && self.is_safe(i + 1));
        if let Some(i) = line_end {
            return i + 1;
        }

        let space = (0..max_pos)
            .rev()
            .find(|&i| self.text[i].is_whitespace() && self.is_safe(i + 1));
        if let Some(i) = space {
            return i + 1;
        }

        max_pos
    }

    fn plain_before(&self, max_pos: usize) -> usize {
        let max_pos = max_pos.min(self.text.len());
        (0..max_pos)
            .rev()
            .find(|&i| self.text[i] == '\n')
            .or_else(|| (0..max_pos).rev().find(|&i| self.text[i].is_whitespace()))
            .map(|i| i + 1)
            .unwrap_or(max_pos)
    }
}
