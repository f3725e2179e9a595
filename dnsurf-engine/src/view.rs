//! Compact payload decoding and hardened document rendering
//!
//! The decoded tree is rebuilt into a standalone HTML document meant for a
//! fully sandboxed frame. Nothing in the output may reach the network: images
//! become `data:` URLs, stylesheet links are dropped, `url(...)` references
//! are replaced, and a restrictive Content-Security-Policy is attached.
//!
//! The vocabulary has no `script` element, event handler attributes or
//! `srcset`, so a decoded tree cannot carry them in the first place.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use surf_protocol::{Attr, CompactNode, ElementNode, PagePayload, Tag};
use surf_render::{escape_attr, escape_text};

use crate::error::{Error, Result};

/// Sandbox attribute value for the frame hosting the document: no
/// permissions at all
pub const SANDBOX_POLICY: &str = "";

/// Policy attached to every rendered document
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; script-src 'none'; \
style-src 'unsafe-inline'; img-src data:; connect-src 'none'; font-src 'none'; \
media-src 'none'; frame-src 'none'; child-src 'none'; manifest-src 'none'; \
worker-src 'none'; object-src 'none'; form-action 'none'; prefetch-src 'none'; \
navigate-to 'none'";

/// Gray stand-in for images that were not shipped
pub const PLACEHOLDER_SVG: &str = "<svg xmlns='http://www.w3.org/2000/svg' width='2' height='1'><rect width='2' height='1' fill='#808080'/></svg>";

/// Styling of the inert form control stand-ins
pub const CHROME_CSS: &str = "\
.__chrome_input{display:inline-flex;align-items:center;width:20ch;min-width:0;\
padding:1px 2px;border:2px inset #eee;background-color:white;font:400 13.3333px Arial;\
color:initial;text-align:left;cursor:not-allowed;height:2em;line-height:2em}\
.__chrome_button{display:inline-flex;align-items:center;padding:1px 6px;\
border:2px outset buttonborder;background-color:buttonface;color:buttontext;\
font:400 13.3333px Arial;height:2em;line-height:2em;text-align:center;cursor:not-allowed}";

/// `link` relations that would make the frame fetch something
const BLOCKED_LINK_RELS: &[&str] = &[
    "stylesheet",
    "icon",
    "preload",
    "prefetch",
    "preconnect",
    "dns-prefetch",
];

static PLACEHOLDER_DATA_URL: Lazy<String> = Lazy::new(|| svg_data_url(PLACEHOLDER_SVG));

static CSS_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)url\s*\(([^)]*)\)").expect("static regex"));

static CSS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@import[^;]+;").expect("static regex"));

static STYLE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</style").expect("static regex"));

/// Decode compressed payload text
pub fn decode_payload(text: &str) -> Result<PagePayload> {
    PagePayload::decompress(text).map_err(|e| Error::Decode(e.to_string()))
}

/// `data:` URL carrying an SVG document
pub fn svg_data_url(svg: &str) -> String {
    format!("data:image/svg+xml;charset=UTF-8,{}", urlencoding::encode(svg))
}

/// The generic image placeholder as a `data:` URL
pub fn placeholder_data_url() -> &'static str {
    &PLACEHOLDER_DATA_URL
}

/// Placeholder for a missing image, labelled with its alt text when present
pub fn placeholder_for_alt(alt: &str) -> String {
    let alt = alt.trim();
    if alt.is_empty() {
        return PLACEHOLDER_DATA_URL.clone();
    }
    svg_data_url(&format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='240' height='240'>\
<rect width='100%' height='100%' fill='#888'/>\
<text x='2%' y='50%' font-size='16' text-anchor='start' dominant-baseline='middle' fill='#fff'>{}</text>\
</svg>",
        escape_attr(alt).replace('\'', "&apos;")
    ))
}

/// Replace every non-`data:` `url(...)` in `css` with the placeholder image
pub fn neutralize_urls(css: &str) -> String {
    CSS_URL
        .replace_all(css, |caps: &Captures| {
            let value = caps[1].trim().trim_matches(|c| c == '"' || c == '\'');
            if is_data_url(value) {
                caps[0].to_string()
            } else {
                format!("url(\"{}\")", placeholder_data_url())
            }
        })
        .into_owned()
}

/// Drop `@import` rules
pub fn strip_imports(css: &str) -> String {
    CSS_IMPORT.replace_all(css, "").into_owned()
}

/// Stylesheet text safe to place inside a `<style>` element
fn safe_stylesheet(css: &str) -> String {
    let css = neutralize_urls(&strip_imports(css));
    STYLE_CLOSE.replace_all(&css, "<\\/style").into_owned()
}

/// Build the standalone document for `payload`
///
/// `base_url` becomes the document base so relative links still resolve for
/// display.
pub fn render_document(payload: &PagePayload, base_url: &str) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("<!doctype html><html");
    write_root_attrs(&mut out, &payload.html_attrs);
    let _ = write!(
        out,
        "><head><meta charset=\"utf-8\"><meta http-equiv=\"Content-Security-Policy\" content=\"{}\"><base href=\"{}\"><style>{}\n{}</style></head><body",
        escape_attr(CONTENT_SECURITY_POLICY),
        escape_attr(base_url),
        CHROME_CSS,
        safe_stylesheet(payload.styles.trim())
    );
    write_root_attrs(&mut out, &payload.body_attrs);
    out.push('>');
    out.push_str(&render_body(&payload.dom, &payload.imgs));
    out.push_str("</body></html>");
    out
}

/// Hardened HTML of a node list
pub fn render_body(nodes: &[CompactNode], imgs: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node, imgs, None);
    }
    out
}

fn write_root_attrs(out: &mut String, attrs: &BTreeMap<Attr, String>) {
    for (attr, value) in attrs {
        let value = match attr {
            Attr::Style => neutralize_urls(value),
            _ => value.clone(),
        };
        let _ = write!(out, " {}=\"{}\"", attr.as_str(), escape_attr(&value));
    }
}

fn write_node(out: &mut String, node: &CompactNode, imgs: &BTreeMap<String, String>, parent: Option<Tag>) {
    match node {
        CompactNode::Text(text) if parent == Some(Tag::Style) => out.push_str(&safe_stylesheet(text)),
        CompactNode::Text(text) => out.push_str(&escape_text(text)),
        CompactNode::Element(el) => write_element(out, el, imgs),
    }
}

fn write_element(out: &mut String, el: &ElementNode, imgs: &BTreeMap<String, String>) {
    if el.tag == Tag::Link && is_blocked_link(el) {
        return;
    }

    let mut attrs: Vec<(Attr, String)> = Vec::with_capacity(el.attrs.len() + 1);
    let mut style = String::new();
    let mut legacy = Vec::new();

    for (attr, value) in &el.attrs {
        match attr {
            Attr::Style => style = neutralize_urls(value),
            Attr::Src if el.tag == Tag::Img => {
                attrs.push((*attr, image_src(value, el.attr(Attr::Alt).unwrap_or(""), imgs)));
            }
            _ => {
                if let Some(decl) = legacy_style(*attr, value) {
                    legacy.push(decl);
                }
                attrs.push((*attr, value.clone()));
            }
        }
    }

    if el.tag == Tag::Button {
        if el.attr(Attr::Disabled).is_none() {
            attrs.push((Attr::Disabled, String::new()));
        }
        legacy.push("cursor:not-allowed".to_string());
        legacy.push("pointer-events:none".to_string());
    }

    if !legacy.is_empty() {
        let style_text = style.trim().trim_end_matches(';').to_string();
        style = if style_text.is_empty() {
            legacy.join(";")
        } else {
            format!("{};{}", style_text, legacy.join(";"))
        };
    }
    if !style.is_empty() {
        attrs.push((Attr::Style, style));
    }

    let tag = el.tag.as_str();
    out.push('<');
    out.push_str(tag);
    for (attr, value) in &attrs {
        let _ = write!(out, " {}=\"{}\"", attr.as_str(), escape_attr(value));
    }
    out.push('>');

    if el.tag.is_void() {
        return;
    }

    for child in &el.children {
        write_node(out, child, imgs, Some(el.tag));
    }
    let _ = write!(out, "</{}>", tag);
}

fn is_blocked_link(el: &ElementNode) -> bool {
    el.attr(Attr::Rel).is_some_and(|rel| {
        rel.split_ascii_whitespace().any(|token| {
            BLOCKED_LINK_RELS
                .iter()
                .any(|blocked| token.eq_ignore_ascii_case(blocked))
        })
    })
}

fn is_data_url(value: &str) -> bool {
    value
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

fn image_src(src: &str, alt: &str, imgs: &BTreeMap<String, String>) -> String {
    if is_data_url(src) {
        return src.to_string();
    }
    match imgs.get(src) {
        Some(svg) => svg_data_url(svg),
        None => placeholder_for_alt(alt),
    }
}

/// CSS declaration equivalent to a presentational attribute
fn legacy_style(attr: Attr, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (property, numeric_px) = match attr {
        Attr::Bgcolor => ("background-color", false),
        Attr::Color => ("color", false),
        Attr::Width => ("width", true),
        Attr::Height => ("height", true),
        Attr::Align => ("text-align", false),
        Attr::Valign => ("vertical-align", false),
        Attr::Border => ("border-width", true),
        Attr::Cellpadding => ("padding", true),
        _ => return None,
    };
    // keep attribute values from closing the declaration early
    let value: String = value.chars().filter(|c| !matches!(c, ';' | '{' | '}')).collect();
    if numeric_px && value.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("{}:{}px", property, value))
    } else {
        Some(format!("{}:{}", property, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(tag: Tag) -> ElementNode {
        ElementNode::new(tag)
    }

    #[test]
    fn test_decode_payload() {
        let payload = PagePayload::notice("hi");
        let text = payload.compress().unwrap();
        assert_eq!(decode_payload(&text).unwrap(), payload);
        assert!(matches!(decode_payload("!!not a payload"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_images_become_data_urls() {
        let mut imgs = BTreeMap::new();
        imgs.insert(
            "/logo.svg".to_string(),
            "<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_string(),
        );
        let nodes = vec![
            el(Tag::Img).with_attr(Attr::Src, "/logo.svg").into(),
            el(Tag::Img)
                .with_attr(Attr::Src, "/photo.jpg")
                .with_attr(Attr::Alt, "A photo")
                .into(),
            el(Tag::Img).with_attr(Attr::Src, "/blank.png").into(),
            el(Tag::Img).with_attr(Attr::Src, "data:image/png;base64,AAAA").into(),
        ];

        let html = render_body(&nodes, &imgs);
        assert!(html.contains(&svg_data_url("<svg xmlns=\"http://www.w3.org/2000/svg\"/>")));
        assert!(html.contains("A%20photo"));
        assert!(html.contains(placeholder_data_url()));
        assert!(html.contains("src=\"data:image/png;base64,AAAA\""));
        assert!(!html.contains("photo.jpg"));
        assert!(!html.contains("</img>"));
    }

    #[test]
    fn test_non_ascii_urls_get_placeholders() {
        let nodes = vec![
            el(Tag::Img).with_attr(Attr::Src, "Straße.png").into(),
            el(Tag::Img).with_attr(Attr::Src, "データ.svg").into(),
        ];
        let html = render_body(&nodes, &BTreeMap::new());
        assert_eq!(html.matches(placeholder_data_url()).count(), 2);
        assert!(!html.contains("Straße"));

        let css = neutralize_urls("a{background:url(Straße.png)}");
        assert!(!css.contains("Straße"));
        assert!(css.contains(placeholder_data_url()));
        assert!(is_data_url("DATA:image/png;base64,AA"));
        assert!(!is_data_url("dat"));
    }

    #[test]
    fn test_fetching_links_are_dropped() {
        let nodes = vec![
            el(Tag::Link)
                .with_attr(Attr::Rel, "shortcut icon")
                .with_attr(Attr::Href, "/favicon.ico")
                .into(),
            el(Tag::Link)
                .with_attr(Attr::Rel, "Stylesheet")
                .with_attr(Attr::Href, "/a.css")
                .into(),
            el(Tag::Link)
                .with_attr(Attr::Rel, "canonical")
                .with_attr(Attr::Href, "/here")
                .into(),
        ];
        let html = render_body(&nodes, &BTreeMap::new());
        assert!(!html.contains("favicon"));
        assert!(!html.contains("a.css"));
        assert!(html.contains("canonical"));
    }

    #[test]
    fn test_style_urls_are_replaced() {
        let node: CompactNode = el(Tag::Div)
            .with_attr(Attr::Style, "background: url('https://x.test/bg.png') no-repeat")
            .into();
        let html = render_body(&[node], &BTreeMap::new());
        assert!(!html.contains("x.test"));
        assert!(html.contains("data:image/svg+xml"));

        let kept = neutralize_urls("a{background:url(data:image/png;base64,AA)}");
        assert_eq!(kept, "a{background:url(data:image/png;base64,AA)}");
    }

    #[test]
    fn test_legacy_attributes_map_to_style() {
        let node: CompactNode = el(Tag::Table)
            .with_attr(Attr::Bgcolor, "#eee")
            .with_attr(Attr::Width, "100")
            .with_attr(Attr::Height, "50%")
            .with_attr(Attr::Cellpadding, "4")
            .with_attr(Attr::Style, "margin:0;")
            .into();
        let html = render_body(&[node], &BTreeMap::new());
        assert!(html.contains(
            "style=\"margin:0;background-color:#eee;width:100px;height:50%;padding:4px\""
        ));
        assert!(html.contains("bgcolor=\"#eee\""));
    }

    #[test]
    fn test_buttons_are_disabled() {
        let node: CompactNode = el(Tag::Button).with_child(CompactNode::text("Go")).into();
        let html = render_body(&[node], &BTreeMap::new());
        assert_eq!(
            html,
            "<button disabled=\"\" style=\"cursor:not-allowed;pointer-events:none\">Go</button>"
        );
    }

    #[test]
    fn test_text_is_escaped() {
        let node: CompactNode = el(Tag::P)
            .with_attr(Attr::Title, "a \"quote\"")
            .with_child(CompactNode::text("<b>not bold</b> & more"))
            .into();
        let html = render_body(&[node], &BTreeMap::new());
        assert_eq!(
            html,
            "<p title=\"a &quot;quote&quot;\">&lt;b&gt;not bold&lt;/b&gt; &amp; more</p>"
        );
    }

    #[test]
    fn test_inline_style_element_is_hardened() {
        let node: CompactNode = el(Tag::Style)
            .with_child(CompactNode::text(
                "@import url(x.css); p > a { background: url(y.png) }</style><p>",
            ))
            .into();
        let html = render_body(&[node], &BTreeMap::new());
        assert!(!html.contains("@import"));
        assert!(!html.contains("y.png"));
        assert!(html.contains("p > a"));
        assert_eq!(html.matches("</style").count(), 1);
    }

    #[test]
    fn test_render_document() {
        let mut payload = PagePayload::notice("hello");
        payload.styles = "@import \"evil.css\"; body{color:red}".to_string();
        payload.html_attrs.insert(Attr::Class, "dark".to_string());
        payload.body_attrs.insert(Attr::Bgcolor, "#fff".to_string());

        let doc = render_document(&payload, "https://example.com/?a=1&b=2");
        assert!(doc.starts_with("<!doctype html><html class=\"dark\"><head>"));
        assert!(doc.contains("http-equiv=\"Content-Security-Policy\""));
        assert!(doc.contains("default-src 'none'"));
        assert!(doc.contains("prefetch-src 'none'; navigate-to 'none'"));
        assert!(doc.contains("<base href=\"https://example.com/?a=1&amp;b=2\">"));
        assert!(doc.contains(".__chrome_input"));
        assert!(doc.contains("body{color:red}"));
        assert!(!doc.contains("evil.css"));
        assert!(doc.contains("<body bgcolor=\"#fff\">"));
        assert!(doc.contains("hello"));
        assert!(doc.ends_with("</body></html>"));
    }
}
