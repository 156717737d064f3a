//! Markdown → speakable plain text.
//!
//! Line-oriented and local. Fenced code blocks are dropped entirely (an
//! unclosed fence hides everything after it until it closes).
//!
//! Normalizing a growing buffer is *not* prefix-stable: `[label` stays
//! literal until its `](url)` arrives and then the bracket disappears.
//! `normalize_mapped` therefore records, for every output byte, the source
//! byte it came from, so callers can keep positions in source coordinates.

/// Normalized text plus an output → source offset map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    /// `origins[i]` is the source offset of output byte `i`; the final entry
    /// is the source length.
    origins: Vec<usize>,
}

impl Normalized {
    /// Source offset of output byte `idx` (`text.len()` maps to the source end).
    pub fn source_offset(&self, idx: usize) -> usize {
        self.origins[idx.min(self.text.len())]
    }

    /// First output byte whose source offset is at or past `source`.
    pub fn output_offset(&self, source: usize) -> usize {
        self.origins[..self.text.len()].partition_point(|&o| o < source)
    }
}

/// Strip markdown syntax that should not be read aloud.
pub fn normalize(text: &str) -> String {
    normalize_mapped(text).text
}

/// Like [`normalize`], keeping track of where each output byte came from.
pub fn normalize_mapped(text: &str) -> Normalized {
    let mut out = Mapped::with_capacity(text.len());
    let mut in_fence = false;
    let mut line_start = 0usize;

    for line in text.split_inclusive('\n') {
        let base = line_start;
        line_start += line.len();

        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || is_rule(trimmed) {
            continue;
        }
        let body = strip_block_prefix(trimmed);
        strip_inline(body, base + line.len() - body.len(), &mut out);
    }

    out.finish(text.len())
}

struct Mapped {
    text: String,
    origins: Vec<usize>,
}

impl Mapped {
    fn with_capacity(cap: usize) -> Self {
        Self {
            text: String::with_capacity(cap),
            origins: Vec::with_capacity(cap + 1),
        }
    }

    fn push(&mut self, c: char, origin: usize) {
        self.text.push(c);
        self.origins.extend(origin..origin + c.len_utf8());
    }

    fn finish(mut self, source_len: usize) -> Normalized {
        self.origins.push(source_len);
        Normalized {
            text: self.text,
            origins: self.origins,
        }
    }
}

/// `---`, `***`, `___` on a line of their own.
fn is_rule(line: &str) -> bool {
    let body: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    body.len() >= 3 && ['-', '*', '_'].iter().any(|&m| body.chars().all(|c| c == m))
}

/// Returns a suffix of `line`.
fn strip_block_prefix(mut line: &str) -> &str {
    loop {
        if let Some(rest) = line.strip_prefix('>') {
            line = rest.trim_start_matches(' ');
            continue;
        }
        break;
    }

    let hashes = line.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with(' ') {
        return line[hashes..].trim_start_matches(' ');
    }

    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim_start_matches(' ');
        }
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(after) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return after.trim_start_matches(' ');
        }
    }

    line
}

/// Append `line` (starting at source offset `base`) minus inline markup.
fn strip_inline(line: &str, base: usize, out: &mut Mapped) {
    let mut i = 0usize;

    while i < line.len() {
        let rest = &line[i..];
        if let Some((label_start, label, consumed)) = parse_link(rest) {
            strip_inline(label, base + i + label_start, out);
            i += consumed;
            continue;
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        let at = i;
        i += c.len_utf8();
        match c {
            '*' | '`' => {}
            '~' if rest.starts_with("~~") => i += 1,
            '_' if is_emphasis_underscore(line, at) => {}
            _ => out.push(c, base + at),
        }
    }
}

/// `[label](url)` or `![alt](url)` at the start of `rest` →
/// (label offset, label, bytes consumed).
fn parse_link(rest: &str) -> Option<(usize, &str, usize)> {
    let offset = if rest.starts_with("![") {
        2
    } else if rest.starts_with('[') {
        1
    } else {
        return None;
    };
    let close = rest[offset..].find("](")? + offset;
    let label = &rest[offset..close];
    if label.contains('\n') {
        return None;
    }
    let url_start = close + 2;
    let url_end = rest[url_start..].find(')')? + url_start;
    if rest[url_start..url_end].contains(char::is_whitespace) {
        return None;
    }
    Some((offset, label, url_end + 1))
}

/// An underscore inside a word (`snake_case`) is kept; one at a word edge is emphasis.
fn is_emphasis_underscore(line: &str, idx: usize) -> bool {
    let prev = line[..idx].chars().next_back();
    let next = line[idx + 1..].chars().next();
    !(prev.is_some_and(char::is_alphanumeric) && next.is_some_and(char::is_alphanumeric))
}
