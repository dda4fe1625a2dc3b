use crate::schema::CharInterval;

/// Locates extraction text in its source, scanning forward so repeated
/// mentions map to successive occurrences.
pub struct Aligner<'a> {
    text: &'a str,
    cursor: usize,
}

impl<'a> Aligner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, cursor: 0 }
    }

    /// Character interval of `needle` in the text, or `None` if it does not occur.
    pub fn align(&mut self, needle: &str) -> Option<CharInterval> {
        let needle = needle.trim();
        if needle.is_empty() {
            return None;
        }

        let exact = |from: usize| {
            self.text[from..]
                .find(needle)
                .map(|i| (from + i, from + i + needle.len()))
        };
        let (byte_start, byte_end) = exact(self.cursor)
            .or_else(|| exact(0))
            .or_else(|| self.find_case_insensitive(needle))?;

        if byte_end > self.cursor {
            self.cursor = byte_end;
        }

        let start = self.text[..byte_start].chars().count();
        Some(CharInterval {
            start,
            end: start + self.text[byte_start..byte_end].chars().count(),
        })
    }

    /// Byte range of the first match of `needle` ignoring case. Characters are
    /// compared by their lowercase expansions, so the range always refers to the
    /// original text even where lowercasing changes lengths.
    fn find_case_insensitive(&self, needle: &str) -> Option<(usize, usize)> {
        let folded: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
        self.text
            .char_indices()
            .find_map(|(start, _)| folded_match_len(&self.text[start..], &folded).map(|len| (start, start + len)))
    }
}

/// Byte length of the prefix of `text` whose lowercase form equals `folded`.
fn folded_match_len(text: &str, folded: &[char]) -> Option<usize> {
    let mut matched = 0;
    for (i, c) in text.char_indices() {
        for lower in c.to_lowercase() {
            if folded.get(matched) != Some(&lower) {
                return None;
            }
            matched += 1;
        }
        if matched == folded.len() {
            return Some(i + c.len_utf8());
        }
    }
    None
}
