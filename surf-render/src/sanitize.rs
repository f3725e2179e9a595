//! Allow-list HTML sanitizer
//!
//! Rewrites a fetched document so that only vocabulary tags and attributes
//! remain. Elements outside the vocabulary are unwrapped: their own text goes,
//! allowed descendants stay. Executable and embedding elements go with their
//! whole subtree. Form controls become inert placeholders.

use scraper::{ElementRef, Html, Node};
use surf_protocol::{Attr, Tag};

/// Class given to placeholder text inputs
pub const INPUT_CLASS: &str = "__chrome_input";

/// Class given to placeholder buttons
pub const BUTTON_CLASS: &str = "__chrome_button";

/// Title of every form control placeholder
pub const UNSUPPORTED_TITLE: &str = "Not supported";

/// Elements removed together with everything inside them
const DISCARD_SUBTREE: &[&str] = &["script", "noscript", "template", "iframe", "object", "embed"];

/// URL schemes allowed in `href`, `src` and `xlink:href`
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto", "tel", "ftp"];

/// Sanitize a full HTML document
pub fn sanitize_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    write_element(document.root_element(), &mut out);
    out
}

fn write_element(element: ElementRef<'_>, out: &mut String) {
    let value = element.value();
    let name = value.name();

    if DISCARD_SUBTREE.contains(&name) {
        return;
    }

    match name {
        "input" => return write_input_placeholder(element, out),
        "select" | "option" | "textarea" => {
            out.push_str("<span></span>");
            return;
        }
        _ => {}
    }

    let Some(tag) = Tag::from_name(name) else {
        // unwrap: keep allowed descendants, drop this element's own text
        for child in element.children() {
            if let Some(child) = ElementRef::wrap(child) {
                write_element(child, out);
            }
        }
        return;
    };

    out.push('<');
    out.push_str(tag.as_str());
    for (attr, value) in allowed_attrs(value.attrs()) {
        push_attr(out, attr.as_str(), &value);
    }
    out.push('>');
    if tag.is_void() {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) if tag == Tag::Style => out.push_str(text),
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(tag.as_str());
    out.push('>');
}

fn write_input_placeholder(element: ElementRef<'_>, out: &mut String) {
    let input = element.value();
    let kind = input.attr("type").unwrap_or("text").trim().to_ascii_lowercase();
    if kind == "hidden" {
        out.push_str("<div></div>");
        return;
    }

    let class = match kind.as_str() {
        "button" | "submit" => BUTTON_CLASS,
        _ => INPUT_CLASS,
    };
    let text = [input.attr("placeholder"), input.attr("value")]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or("\u{a0}");

    out.push_str("<div");
    push_attr(out, "class", class);
    push_attr(out, "title", UNSUPPORTED_TITLE);
    out.push('>');
    out.push_str(&escape_text(text));
    out.push_str("</div>");
}

/// Vocabulary attributes of an element, with unsafe URLs removed
pub fn allowed_attrs<'a>(
    attrs: impl Iterator<Item = (&'a str, &'a str)> + 'a,
) -> impl Iterator<Item = (Attr, String)> + 'a {
    attrs.filter_map(|(name, value)| {
        let attr = Attr::from_name(name)?;
        if attr.is_url() && !is_allowed_url(value) {
            return None;
        }
        Some((attr, value.to_string()))
    })
}

/// Whether a URL attribute value is relative or uses an allowed scheme
pub fn is_allowed_url(value: &str) -> bool {
    let value = value.trim();
    match url_scheme(value) {
        Some(scheme) => ALLOWED_SCHEMES
            .iter()
            .any(|allowed| scheme.eq_ignore_ascii_case(allowed)),
        None => true,
    }
}

/// Scheme of an absolute URL, `None` when the value is relative
pub fn url_scheme(value: &str) -> Option<&str> {
    let end = value.find(|c: char| matches!(c, ':' | '/' | '?' | '#'))?;
    if !value[end..].starts_with(':') || end == 0 {
        return None;
    }
    let scheme = &value[..end];
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    // anything else before the colon still makes a browser treat it as a scheme
    Some(if valid { scheme } else { "" })
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

/// Escape text content for HTML
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a double-quoted attribute value
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
