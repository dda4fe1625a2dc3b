use regex::Regex;
use std::sync::LazyLock;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?。！？]+["'”’)\]]*\s+|\n\s*\n"#).unwrap());

/// A window of the source text sent to the backend in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunk<'a> {
    /// Character (not byte) offset of the chunk in the source.
    pub char_offset: usize,
    pub text: &'a str,
}

/// Split `text` into chunks of at most `max_chars` characters, cutting on
/// sentence or paragraph boundaries where possible.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk<'_>> {
    let max_chars = max_chars.max(1);
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    let mut start = 0;
    let mut end = 0;
    let mut len = 0;

    for (seg_start, seg_end) in sentence_segments(text) {
        let seg_len = text[seg_start..seg_end].chars().count();

        if len > 0 && len + seg_len > max_chars {
            ranges.push((start, end));
            len = 0;
        }
        if len == 0 {
            start = seg_start;
        }

        if seg_len > max_chars {
            // A single sentence longer than the buffer: cut it on char boundaries.
            let mut piece_start = seg_start;
            let mut count = 0;
            for (i, _) in text[seg_start..seg_end].char_indices() {
                if count == max_chars {
                    ranges.push((piece_start, seg_start + i));
                    piece_start = seg_start + i;
                    count = 0;
                }
                count += 1;
            }
            ranges.push((piece_start, seg_end));
            len = 0;
            continue;
        }

        end = seg_end;
        len += seg_len;
    }
    if len > 0 {
        ranges.push((start, end));
    }

    let mut chunks = Vec::with_capacity(ranges.len());
    let mut chars_before = 0;
    let mut bytes_seen = 0;
    for (s, e) in ranges {
        chars_before += text[bytes_seen..s].chars().count();
        bytes_seen = s;
        let piece = &text[s..e];
        if !piece.trim().is_empty() {
            chunks.push(TextChunk {
                char_offset: chars_before,
                text: piece,
            });
        }
    }
    chunks
}

fn sentence_segments(text: &str) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut prev = 0;
    for m in SENTENCE_END.find_iter(text) {
        segments.push((prev, m.end()));
        prev = m.end();
    }
    if prev < text.len() {
        segments.push((prev, text.len()));
    }
    segments
}
