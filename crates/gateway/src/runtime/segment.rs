//! Sentence segmentation of streamed reply text for incremental TTS.
//!
//! Rule (deterministic): a fragment is cut after `.`, `!`, `?` or `…`
//! followed by whitespace, provided at least `min_len` chars are pending;
//! independently, once the pending buffer reaches `soft_cap` chars it is
//! force-split at the last whitespace (or at the cap when there is none).

/// Accumulates streamed deltas and yields synthesizable fragments.
#[derive(Debug)]
pub struct SentenceSegmenter {
    buf: String,
    soft_cap: usize,
    min_len: usize,
}

impl SentenceSegmenter {
    pub fn new(soft_cap: usize, min_len: usize) -> Self {
        Self {
            buf: String::new(),
            soft_cap: soft_cap.max(2),
            min_len,
        }
    }

    /// Feed a delta; returns zero or more complete fragments.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buf.push_str(delta);
        let mut out = Vec::new();
        loop {
            match self.next_cut() {
                Some(cut) => {
                    let rest = self.buf.split_off(cut);
                    let fragment = std::mem::replace(&mut self.buf, rest);
                    let fragment = fragment.trim().to_string();
                    if !fragment.is_empty() {
                        out.push(fragment);
                    }
                }
                None => break,
            }
        }
        out
    }

    /// Drain whatever is left when the reply stream closes.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Byte index to cut at, or None if no boundary is ready.
    fn next_cut(&self) -> Option<usize> {
        let mut chars = self.buf.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            let end = idx + c.len_utf8();
            if is_terminal(c) && end >= self.min_len {
                if let Some((_, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(end);
                    }
                }
            }
        }

        if self.buf.len() >= self.soft_cap {
            // Force a split at the last whitespace under the cap.
            let cut = self.buf[..self.soft_cap]
                .char_indices()
                .filter(|(_, c)| c.is_whitespace())
                .map(|(i, _)| i)
                .last()
                .unwrap_or_else(|| floor_char_boundary(&self.buf, self.soft_cap));
            if cut > 0 {
                return Some(cut);
            }
        }

        None
    }
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_after_terminal_punctuation_and_whitespace() {
        let mut seg = SentenceSegmenter::new(240, 4);
        assert!(seg.push("Why did the chicken").is_empty());
        let frags = seg.push(" cross? To get to the other side. And");
        assert_eq!(
            frags,
            vec!["Why did the chicken cross?", "To get to the other side."]
        );
        assert_eq!(seg.flush().as_deref(), Some("And"));
    }

    #[test]
    fn short_fragments_wait_for_more_text() {
        let mut seg = SentenceSegmenter::new(240, 24);
        // "Hi. " alone is under min_len; it rides along with the next
        // sentence.
        assert!(seg.push("Hi. ").is_empty());
        let frags = seg.push("The weather in Tokyo is clear today. More");
        assert_eq!(frags, vec!["Hi. The weather in Tokyo is clear today."]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let mut seg = SentenceSegmenter::new(240, 4);
        let frags = seg.push("The total is 3.50 euros today. Next");
        assert_eq!(frags, vec!["The total is 3.50 euros today."]);
    }

    #[test]
    fn soft_cap_forces_a_split_at_whitespace() {
        let mut seg = SentenceSegmenter::new(20, 4);
        let frags = seg.push("a very long unpunctuated reply keeps flowing");
        assert!(!frags.is_empty());
        assert!(frags[0].len() <= 20);
        // Nothing is lost between fragments and the flush.
        let mut all = frags.join(" ");
        if let Some(rest) = seg.flush() {
            all.push(' ');
            all.push_str(&rest);
        }
        assert_eq!(all, "a very long unpunctuated reply keeps flowing");
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_char() {
        let mut seg = SentenceSegmenter::new(12, 2);
        let text = "čućoro ćirilica ёжик весёлый";
        let mut frags = seg.push(text);
        if let Some(rest) = seg.flush() {
            frags.push(rest);
        }
        // Re-joining loses only whitespace at the cut points.
        assert_eq!(
            frags.join(" ").replace(' ', ""),
            text.replace(' ', "")
        );
    }

    #[test]
    fn flush_on_empty_buffer_is_none() {
        let mut seg = SentenceSegmenter::new(240, 4);
        assert!(seg.flush().is_none());
        seg.push("done. ");
        seg.flush();
        assert!(seg.flush().is_none());
    }

    #[test]
    fn deterministic_for_identical_input() {
        let feed = ["Hello", " there. How", " are you? Fine."];
        let run = || {
            let mut seg = SentenceSegmenter::new(240, 4);
            let mut frags: Vec<String> = Vec::new();
            for d in feed {
                frags.extend(seg.push(d));
            }
            frags.extend(seg.flush());
            frags
        };
        assert_eq!(run(), run());
    }
}
