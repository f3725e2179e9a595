//! Fragment framing
//!
//! A compressed page is cut into slices; each DNS answer carries one slice
//! behind a `<|index/total|> ` header. Indices are 1-based. A fragment with
//! `index == total` and an empty body marks a page offset past the end.

use crate::error::Result;
use crate::payload::{PagePayload, PAGE_TOO_LARGE};

/// Maximum bytes in one TXT character-string
pub const TXT_MAX_BYTES: usize = 255;

/// Default slice length in characters
pub const DEFAULT_CHUNK_SIZE: usize = 240;

/// Default ceiling on the number of slices per page
pub const DEFAULT_PART_LIMIT: usize = 300;

/// One framed slice of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// 1-based position
    pub index: u32,
    pub total: u32,
    pub text: String,
}

impl Fragment {
    pub fn new(index: u32, total: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            total,
            text: text.into(),
        }
    }

    /// A complete payload in a single fragment
    pub fn single(text: impl Into<String>) -> Self {
        Self::new(1, 1, text)
    }

    /// Answer for a page offset at or beyond `total`
    pub fn terminal(total: u32) -> Self {
        Self::new(total, total, String::new())
    }

    pub fn is_terminal(&self) -> bool {
        self.index == self.total && self.text.is_empty()
    }

    pub fn header(&self) -> String {
        format!("<|{}/{}|> ", self.index, self.total)
    }

    /// Header plus body, cut at a char boundary so the result fits one TXT string
    pub fn to_wire(&self) -> String {
        let mut wire = self.header();
        let room = TXT_MAX_BYTES.saturating_sub(wire.len());
        let mut end = self.text.len().min(room);
        while !self.text.is_char_boundary(end) {
            end -= 1;
        }
        if end < self.text.len() {
            log::warn!(
                "fragment {}/{} truncated from {} to {} bytes",
                self.index,
                self.total,
                self.text.len(),
                end
            );
        }
        wire.push_str(&self.text[..end]);
        wire
    }

    /// Parse a wire string
    ///
    /// Text without a well-formed header is taken as a complete single
    /// fragment.
    pub fn parse(wire: &str) -> Self {
        parse_header(wire).unwrap_or_else(|| Self::single(wire))
    }
}

fn parse_header(wire: &str) -> Option<Fragment> {
    let rest = wire.trim_start().strip_prefix("<|")?;
    let (index, rest) = rest.split_once('/')?;
    let (total, body) = rest.split_once("|>")?;
    Some(Fragment {
        index: parse_digits(index)?,
        total: parse_digits(total)?,
        text: body.trim_start().to_string(),
    })
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Split `text` into slices of at most `size` characters
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Pick the fragment that answers `page` (0-based) of a sliced page
pub fn select_fragment(chunks: &[String], page: u32, part_limit: usize) -> Result<Fragment> {
    if chunks.len() > part_limit {
        log::info!(
            "page has {} parts, over the limit of {}",
            chunks.len(),
            part_limit
        );
        return Ok(Fragment::single(
            PagePayload::notice(PAGE_TOO_LARGE).compress()?,
        ));
    }

    let total = chunks.len() as u32;
    match chunks.get(page as usize) {
        Some(chunk) => Ok(Fragment::new(page + 1, total, chunk.clone())),
        None => Ok(Fragment::terminal(total)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(Fragment::parse("<|2/5|> hello"), Fragment::new(2, 5, "hello"));
        assert_eq!(Fragment::parse("  <|1/1|>abc"), Fragment::new(1, 1, "abc"));
        assert_eq!(Fragment::parse("<|3/3|> "), Fragment::terminal(3));
        assert_eq!(Fragment::parse("<|2/5|> a\nb"), Fragment::new(2, 5, "a\nb"));
        assert_eq!(Fragment::parse("<|1/2|>\n\nline"), Fragment::new(1, 2, "line"));
    }

    #[test]
    fn test_parse_without_header() {
        assert_eq!(Fragment::parse("hello"), Fragment::new(1, 1, "hello"));
        assert_eq!(Fragment::parse("<|a/5|> x"), Fragment::new(1, 1, "<|a/5|> x"));
        assert_eq!(Fragment::parse("<|1/|> x"), Fragment::new(1, 1, "<|1/|> x"));
        assert_eq!(Fragment::parse(""), Fragment::new(1, 1, ""));
    }

    #[test]
    fn test_wire_round_trip() {
        let frag = Fragment::new(7, 12, "abcdef");
        assert_eq!(frag.to_wire(), "<|7/12|> abcdef");
        assert_eq!(Fragment::parse(&frag.to_wire()), frag);
    }

    #[test]
    fn test_to_wire_truncates_on_char_boundary() {
        let frag = Fragment::new(1, 1, "é".repeat(200));
        let wire = frag.to_wire();
        assert!(wire.len() <= TXT_MAX_BYTES);
        assert!(wire.len() >= TXT_MAX_BYTES - 1);
        assert!(wire.ends_with('é'));
    }

    #[test]
    fn test_chunk_text() {
        assert!(chunk_text("", 240).is_empty());

        let text = "x".repeat(500);
        let sizes: Vec<usize> = chunk_text(&text, 240).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![240, 240, 20]);

        let multibyte = chunk_text("ééé", 2);
        assert_eq!(multibyte, vec!["éé".to_string(), "é".to_string()]);
    }

    #[test]
    fn test_select_fragment() {
        let chunks = chunk_text(&"y".repeat(500), 240);
        let first = select_fragment(&chunks, 0, 300).unwrap();
        assert_eq!((first.index, first.total), (1, 3));
        assert_eq!(first.text.len(), 240);

        let last = select_fragment(&chunks, 2, 300).unwrap();
        assert_eq!((last.index, last.total, last.text.len()), (3, 3, 20));

        let past = select_fragment(&chunks, 3, 300).unwrap();
        assert_eq!(past, Fragment::terminal(3));
        assert!(past.is_terminal());
    }

    #[test]
    fn test_select_fragment_too_large() {
        let chunks = chunk_text(&"z".repeat(50), 10);
        for page in 0..6 {
            let frag = select_fragment(&chunks, page, 4).unwrap();
            assert_eq!((frag.index, frag.total), (1, 1));
            let notice = PagePayload::decompress(&frag.text).unwrap();
            assert_eq!(notice, PagePayload::notice(PAGE_TOO_LARGE));
        }
    }
}
