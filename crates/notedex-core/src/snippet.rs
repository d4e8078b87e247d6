//! Short excerpts of document content around the first query match.
//!
//! Lengths and offsets are counted in characters, never bytes, so windows
//! cannot split a multi-byte character.

pub const DEFAULT_SNIPPET_LENGTH: usize = 200;

const MAX_LEAD: usize = 50;
const ELLIPSIS: &str = "...";

/// Excerpt of `content` around the first case-insensitive occurrence of
/// `query`, falling back to the first query word longer than two characters,
/// and then to the start of the content.
pub fn snippet(content: &str, query: &str, max_length: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if query.trim().is_empty() {
        return head(&chars, max_length);
    }

    let lowered: Vec<char> = chars.iter().map(|&c| fold(c)).collect();
    let needle: Vec<char> = query.chars().map(fold).collect();
    let lead = MAX_LEAD.min(max_length / 4);

    if let Some(at) = find(&lowered, &needle) {
        return window(&chars, at, at + needle.len() + max_length - lead, lead);
    }

    let word_hit = query
        .split_whitespace()
        .map(|word| word.chars().map(fold).collect::<Vec<_>>())
        .filter(|word| word.len() > 2)
        .find_map(|word| find(&lowered, &word));
    match word_hit {
        Some(at) => window(&chars, at, at + max_length - lead, lead),
        None => head(&chars, max_length),
    }
}

/// Single-char lowercase mapping, so folded text stays index-aligned with the input.
fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn head(chars: &[char], max_length: usize) -> String {
    let mut out: String = chars.iter().take(max_length).collect();
    out.push_str(ELLIPSIS);
    out
}

fn window(chars: &[char], at: usize, end: usize, lead: usize) -> String {
    let start = at.saturating_sub(lead);
    let end = end.min(chars.len());
    let mut out = String::new();
    if start > 0 {
        out.push_str(ELLIPSIS);
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str(ELLIPSIS);
    }
    out
}
