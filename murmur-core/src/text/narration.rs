//! Narration-mode content filter.
//!
//! In narration mode only text wrapped in a start/end marker pair is spoken;
//! everything else in the stream is display-only. Markers are matched
//! ASCII-case-insensitively, which keeps byte offsets identical between the
//! original text and its lowercased copy.

use tracing::warn;

pub const DEFAULT_START_MARKER: &str = "<narration>";
pub const DEFAULT_END_MARKER: &str = "</narration>";

/// A start/end delimiter pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationMarkers {
    start: String,
    end: String,
}

impl NarrationMarkers {
    /// Build a marker pair. Markers are stored lowercased.
    ///
    /// The start marker should not occur inside the end marker, or open/close
    /// counting in [`has_open_marker`](Self::has_open_marker) becomes ambiguous.
    pub fn new(start: &str, end: &str) -> Self {
        let start = start.to_ascii_lowercase();
        let end = end.to_ascii_lowercase();
        if end.contains(&start) {
            warn!(start = %start, end = %end, "narration end marker contains the start marker");
        }
        Self { start, end }
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// Trimmed bodies of every complete marker pair, in order, joined by a
    /// blank line. Empty bodies are skipped; an unterminated trailing pair is
    /// ignored.
    pub fn extract(&self, text: &str) -> String {
        if self.start.is_empty() || self.end.is_empty() {
            return String::new();
        }
        let haystack = text.to_ascii_lowercase();
        let mut parts: Vec<&str> = Vec::new();
        let mut pos = 0usize;

        while let Some(open) = haystack[pos..].find(&self.start) {
            let body_start = pos + open + self.start.len();
            let Some(close) = haystack[body_start..].find(&self.end) else {
                break;
            };
            let body_end = body_start + close;
            let body = text[body_start..body_end].trim();
            if !body.is_empty() {
                parts.push(body);
            }
            pos = body_end + self.end.len();
        }

        parts.join("\n\n")
    }

    /// `true` while more start markers than end markers have been seen.
    pub fn has_open_marker(&self, text: &str) -> bool {
        if self.start.is_empty() || self.end.is_empty() {
            return false;
        }
        let haystack = text.to_ascii_lowercase();
        haystack.matches(&self.start).count() > haystack.matches(&self.end).count()
    }
}

impl Default for NarrationMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_START_MARKER, DEFAULT_END_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_complete_pairs_in_order() {
        let m = NarrationMarkers::default();
        let text = "Thinking... <narration> Hello there. </narration> code here \
                    <NARRATION>Second part.</Narration> trailing";
        assert_eq!(m.extract(text), "Hello there.\n\nSecond part.");
    }

    #[test]
    fn skips_empty_bodies_and_unterminated_pairs() {
        let m = NarrationMarkers::default();
        let text = "<narration>  </narration><narration>Kept.</narration><narration>open";
        assert_eq!(m.extract(text), "Kept.");
    }

    #[test]
    fn no_markers_extracts_nothing() {
        let m = NarrationMarkers::default();
        assert_eq!(m.extract("plain text with no markers."), "");
        assert!(!m.has_open_marker("plain text with no markers."));
    }

    #[test]
    fn open_marker_detection() {
        let m = NarrationMarkers::default();
        assert!(m.has_open_marker("<narration>still talking"));
        assert!(!m.has_open_marker("<narration>done</narration>"));
        assert!(m.has_open_marker("<narration>a</narration> <Narration>b"));
    }

    #[test]
    fn partial_start_marker_is_not_open() {
        let m = NarrationMarkers::default();
        assert!(!m.has_open_marker("text <narr"));
        assert_eq!(m.extract("text <narr"), "");
    }

    #[test]
    fn custom_markers_are_substitutable() {
        let m = NarrationMarkers::new("[[speak]]", "[[/speak]]");
        let text = "noise [[SPEAK]]Say this.[[/speak]] more noise [[speak]]and";
        assert_eq!(m.extract(text), "Say this.");
        assert!(m.has_open_marker(text));
    }

    #[test]
    fn non_ascii_content_keeps_offsets() {
        let m = NarrationMarkers::default();
        let text = "Ünïcödé <narration>Grüße, Welt.</narration>";
        assert_eq!(m.extract(text), "Grüße, Welt.");
    }
}
