//! Stylesheet purging and minification
//!
//! [`purge_css`] drops style rules whose selectors cannot match anything in
//! the page body. It works on the rule structure only and keeps every rule it
//! does not understand. [`minify_css`] prints the result compactly.

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

use crate::compact::{collapse_whitespace, Snapshot};

/// At-rules whose block holds further style rules
const NESTED_AT_RULES: &[&str] = &["media", "supports", "document", "layer", "container"];

/// Remove rules that match nothing in `snapshot`
pub fn purge_css(css: &str, snapshot: &Snapshot) -> String {
    purge_block(&strip_comments(css), snapshot)
}

fn purge_block(css: &str, snapshot: &Snapshot) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let Some(open) = find_top_level(rest, |c| c == '{' || c == ';') else {
            break;
        };

        if rest[open..].starts_with(';') {
            let statement = rest[..=open].trim();
            if !starts_with_ignore_case(statement, "@import") {
                out.push_str(statement);
            }
            rest = &rest[open + 1..];
            continue;
        }

        let prelude = rest[..open].trim();
        let close = matching_brace(rest, open);
        let body = &rest[open + 1..close];
        rest = rest.get(close + 1..).unwrap_or("");

        if let Some(at_rule) = prelude.strip_prefix('@') {
            let name: String = at_rule
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
                .to_ascii_lowercase();
            if NESTED_AT_RULES.contains(&name.as_str()) {
                let inner = purge_block(body, snapshot);
                if !inner.trim().is_empty() {
                    push_rule(&mut out, prelude, &inner);
                }
            } else {
                push_rule(&mut out, prelude, body);
            }
            continue;
        }

        let kept: Vec<&str> = split_top_level(prelude, ',')
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty() && selector_matches(s, snapshot))
            .collect();
        if !kept.is_empty() {
            push_rule(&mut out, &kept.join(","), body);
        }
    }

    out
}

fn push_rule(out: &mut String, prelude: &str, body: &str) {
    out.push_str(prelude);
    out.push('{');
    out.push_str(body.trim());
    out.push('}');
}

/// Whether every type, class and id in `selector` occurs in the page
pub fn selector_matches(selector: &str, snapshot: &Snapshot) -> bool {
    let chars: Vec<char> = selector.chars().collect();
    let mut i = 0;
    let mut compound_start = true;

    while i < chars.len() {
        match chars[i] {
            c @ ('.' | '#') => {
                let (name, next) = read_ident(&chars, i + 1);
                let known = if c == '.' {
                    &snapshot.classes
                } else {
                    &snapshot.ids
                };
                if !name.is_empty() && !known.contains(&name) {
                    return false;
                }
                i = next.max(i + 1);
                compound_start = false;
            }
            ':' => {
                i += 1;
                if chars.get(i) == Some(&':') {
                    i += 1;
                }
                let (_, next) = read_ident(&chars, i);
                i = next;
                if chars.get(i) == Some(&'(') {
                    i = skip_balanced(&chars, i, '(', ')');
                }
                compound_start = false;
            }
            '[' => {
                i = skip_balanced(&chars, i, '[', ']');
                compound_start = false;
            }
            '>' | '+' | '~' => {
                i += 1;
                compound_start = true;
            }
            c if c.is_whitespace() => {
                i += 1;
                compound_start = true;
            }
            '*' | '|' => {
                i += 1;
                compound_start = false;
            }
            _ => {
                let (name, next) = read_ident(&chars, i);
                if name.is_empty() {
                    i += 1;
                    continue;
                }
                if compound_start && !snapshot.tags.contains(&name.to_ascii_lowercase()) {
                    return false;
                }
                i = next;
                compound_start = false;
            }
        }
    }
    true
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut name = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if let Some(escaped) = chars.get(i + 1) {
                name.push(*escaped);
            }
            i += 2;
        } else if c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            name.push(c);
            i += 1;
        } else {
            break;
        }
    }
    (name, i.min(chars.len()))
}

fn skip_balanced(chars: &[char], start: usize, open: char, close: char) -> usize {
    let mut depth = 0;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == open {
            depth += 1;
        } else if chars[i] == close {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    chars.len()
}

/// Byte index of the first char accepted by `pred` outside strings and parens
fn find_top_level(s: &str, pred: impl Fn(char) -> bool) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut parens = 0usize;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => parens += 1,
            (None, ')') => parens = parens.saturating_sub(1),
            (None, c) if parens == 0 && pred(c) => return Some(i),
            _ => {}
        }
    }
    None
}

/// Byte index of the brace closing the one at `open`, or `s.len()` if unclosed
fn matching_brace(s: &str, open: usize) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return open + i;
                }
            }
            _ => {}
        }
    }
    s.len()
}

/// Split on `sep` outside strings, parens and brackets
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Remove `/* ... */` comments
pub fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Print a stylesheet in minified form
///
/// Falls back to comment and whitespace stripping when the stylesheet cannot
/// be parsed.
pub fn minify_css(css: &str) -> String {
    let printed = StyleSheet::parse(
        css,
        ParserOptions {
            error_recovery: true,
            ..ParserOptions::default()
        },
    )
    .ok()
    .and_then(|sheet| {
        sheet
            .to_css(PrinterOptions {
                minify: true,
                ..PrinterOptions::default()
            })
            .ok()
    });

    match printed {
        Some(out) => out.code,
        None => {
            log::debug!("stylesheet did not parse, stripping whitespace only");
            collapse_whitespace(&strip_comments(css))
        }
    }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}
