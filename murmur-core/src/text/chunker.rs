//! Sentence-level chunking of speakable text.
//!
//! ## Algorithm
//!
//! 1. Split into units after `.`, `!`, `?`, `;`, `:` when followed by
//!    whitespace, and after every newline. A unit keeps its trailing
//!    whitespace run, so units tile the input exactly.
//! 2. Greedily append units to the current segment while the trimmed segment
//!    stays within the limit (`first_chunk_max_chars` for the first segment,
//!    `max_chars` afterwards; counted in chars).
//! 3. A unit that alone exceeds the limit becomes its own segment, never split.
//! 4. Whitespace-only units are absorbed by the surrounding segment.
//!
//! Segment spans are byte ranges into the input and tile it from offset 0,
//! so concatenating `&text[span]` for every segment reproduces the input
//! (trailing whitespace after the last segment included).

use std::ops::Range;

/// One speakable unit of text chosen as a synthesis boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Trimmed text handed to the synthesizer.
    pub text: String,
    /// Byte range in the chunked text, surrounding whitespace included.
    pub span: Range<usize>,
}

impl Segment {
    /// Number of chars in the trimmed text.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into ordered segments.
///
/// Returns an empty vector for empty or whitespace-only input.
pub fn chunk(text: &str, max_chars: usize, first_chunk_max_chars: usize) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Option<Range<usize>> = None;
    let mut next_start = 0usize;

    for unit in split_units(text) {
        if text[unit.clone()].trim().is_empty() {
            if let Some(cur) = current.as_mut() {
                cur.end = unit.end;
            }
            continue;
        }

        let Some(cur) = current.as_mut() else {
            current = Some(next_start..unit.end);
            continue;
        };

        let limit = if segments.is_empty() {
            first_chunk_max_chars
        } else {
            max_chars
        };
        let combined = text[cur.start..unit.end].trim().chars().count();
        if combined > limit {
            let closed = cur.clone();
            next_start = closed.end;
            segments.push(make_segment(text, closed));
            current = Some(next_start..unit.end);
        } else {
            cur.end = unit.end;
        }
    }

    if let Some(cur) = current {
        segments.push(make_segment(text, cur));
    }
    segments
}

fn make_segment(text: &str, span: Range<usize>) -> Segment {
    Segment {
        text: text[span.clone()].trim().to_string(),
        span,
    }
}

/// Byte ranges of sentence units; together they cover `text` exactly.
fn split_units(text: &str) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let terminal = match c {
            '\n' => true,
            '.' | '!' | '?' | ';' | ':' => chars
                .peek()
                .is_some_and(|&(_, next)| next.is_whitespace()),
            _ => false,
        };
        if !terminal {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        units.push(start..end);
        start = end;
    }

    if start < text.len() {
        units.push(start..text.len());
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    fn rebuild(text: &str, segments: &[Segment]) -> String {
        segments.iter().map(|s| &text[s.span.clone()]).collect()
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        assert!(chunk("", 135, 60).is_empty());
        assert!(chunk("   \n\t  ", 135, 60).is_empty());
    }

    #[test]
    fn short_sentences_share_the_first_segment() {
        let text = "First sentence. Second sentence.";
        let segments = chunk(text, 135, 60);
        assert_eq!(texts(&segments), vec!["First sentence. Second sentence."]);
        assert_eq!(rebuild(text, &segments), text);
    }

    #[test]
    fn first_segment_uses_the_shorter_limit() {
        let text = "One two three. Four five six. Seven eight nine.";
        let segments = chunk(text, 135, 20);
        assert_eq!(
            texts(&segments),
            vec!["One two three.", "Four five six. Seven eight nine."]
        );
    }

    #[test]
    fn later_segments_use_max_chars() {
        let text = "Aaaa. Bbbb. Cccc. Dddd.";
        let segments = chunk(text, 11, 5);
        assert_eq!(texts(&segments), vec!["Aaaa.", "Bbbb. Cccc.", "Dddd."]);
        assert_eq!(rebuild(text, &segments), text);
    }

    #[test]
    fn oversized_unit_is_kept_whole() {
        let long = "This single sentence is much longer than the tiny limit allows";
        let text = format!("Hi. {long}. Bye.");
        let expected = format!("{long}.");
        let segments = chunk(&text, 10, 10);
        assert_eq!(texts(&segments), vec!["Hi.", expected.as_str(), "Bye."]);
        assert_eq!(rebuild(&text, &segments), text);
    }

    #[test]
    fn punctuation_without_whitespace_does_not_split() {
        let segments = chunk("Version 1.2.3 is out.Really", 5, 5);
        assert_eq!(texts(&segments), vec!["Version 1.2.3 is out.Really"]);
    }

    #[test]
    fn splits_on_all_terminators_and_newlines() {
        let text = "Wait! Why? Because; reasons: many\nnext line";
        let segments = chunk(text, 1, 1);
        assert_eq!(
            texts(&segments),
            vec!["Wait!", "Why?", "Because;", "reasons:", "many", "next line"]
        );
        assert_eq!(rebuild(text, &segments), text);
    }

    #[test]
    fn whitespace_only_units_are_absorbed() {
        let text = "\n\n  Hello there.\n\n\nGeneral Kenobi.\n";
        let segments = chunk(text, 5, 5);
        assert_eq!(texts(&segments), vec!["Hello there.", "General Kenobi."]);
        assert_eq!(rebuild(text, &segments), text);
    }

    #[test]
    fn limit_counts_chars_not_bytes() {
        let text = "Héllo wörld. Ünïcödé tëxt.";
        let segments = chunk(text, 30, 30);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].char_len(), 26);
    }

    #[test]
    fn rechunking_a_growing_prefix_keeps_closed_segments() {
        let full = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa.";
        let prefix = &full[..40];
        let a = chunk(prefix, 20, 20);
        let b = chunk(full, 20, 20);
        for (x, y) in a.iter().zip(b.iter()).take(a.len() - 1) {
            assert_eq!(x, y);
        }
    }
}
