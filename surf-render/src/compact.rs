//! Compaction of a sanitized document
//!
//! Everything here is synchronous and returns owned data, so the parsed
//! document never lives across an `.await`.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use surf_protocol::{Attr, CompactNode, ElementNode, Tag};
use url::Url;

static SVG_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.svg(\?|#|$)").expect("static regex"));

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("static selector"));
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("static selector"));

/// A stylesheet in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    Inline(String),
    /// Absolute URL of a linked stylesheet
    External(String),
}

/// An image that may be inlined as SVG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvgCandidate {
    /// `src` as written in the document
    pub src: String,
    /// `src` resolved against the page URL
    pub url: String,
}

/// Tags, classes and ids present in the page body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub tags: HashSet<String>,
    pub classes: HashSet<String>,
    pub ids: HashSet<String>,
}

/// Owned result of compacting one document
#[derive(Debug, Clone, Default)]
pub struct DocumentParts {
    pub dom: Vec<CompactNode>,
    pub html_attrs: BTreeMap<Attr, String>,
    pub body_attrs: BTreeMap<Attr, String>,
    pub styles: Vec<StyleSource>,
    pub svgs: Vec<SvgCandidate>,
    pub snapshot: Snapshot,
}

/// Compact a sanitized document
///
/// `base` resolves relative stylesheet and image URLs; at most `max_svgs`
/// image candidates are returned.
pub fn extract(html: &str, base: &Url, max_svgs: usize) -> DocumentParts {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut parts = DocumentParts {
        html_attrs: vocabulary_attrs(root),
        styles: style_sources(&document, base),
        ..Default::default()
    };

    if let Some(body) = document.select(&BODY).next() {
        parts.body_attrs = vocabulary_attrs(body);
        parts.dom = compact_children(body, false);
        parts.svgs = svg_candidates(body, base, max_svgs);
        parts.snapshot = snapshot(body);
    }

    parts
}

fn vocabulary_attrs(element: ElementRef<'_>) -> BTreeMap<Attr, String> {
    element
        .value()
        .attrs()
        .filter_map(|(name, value)| Some((Attr::from_name(name)?, value.to_string())))
        .collect()
}

fn compact_children(element: ElementRef<'_>, preserve: bool) -> Vec<CompactNode> {
    let mut nodes = Vec::new();
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let text = if preserve {
                    (**text).to_string()
                } else {
                    collapse_whitespace(text)
                };
                if !text.is_empty() {
                    nodes.push(CompactNode::Text(text));
                }
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child).and_then(|c| compact_element(c, preserve))
                {
                    nodes.push(el.into());
                }
            }
            _ => {}
        }
    }
    nodes
}

fn compact_element(element: ElementRef<'_>, preserve: bool) -> Option<ElementNode> {
    let tag = Tag::from_name(element.value().name())?;
    if tag == Tag::Style || (tag == Tag::Link && is_stylesheet(element)) {
        return None;
    }

    let attrs = element
        .value()
        .attrs()
        .filter_map(|(name, value)| Some((Attr::from_name(name)?, value.to_string())))
        .collect();
    let children = compact_children(element, preserve || tag.preserves_whitespace());

    Some(ElementNode {
        tag,
        attrs,
        children,
    })
}

fn is_stylesheet(link: ElementRef<'_>) -> bool {
    link.value()
        .attr("rel")
        .map(|rel| {
            rel.split_ascii_whitespace()
                .any(|r| r.eq_ignore_ascii_case("stylesheet"))
        })
        .unwrap_or(false)
}

/// Collapse whitespace runs to one space and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn style_sources(document: &Html, base: &Url) -> Vec<StyleSource> {
    let mut sources = Vec::new();
    for el in document.root_element().descendants().filter_map(ElementRef::wrap) {
        let source = match el.value().name() {
            "style" => {
                let css = el.text().collect::<String>();
                let css = css.trim();
                if css.is_empty() {
                    continue;
                }
                StyleSource::Inline(css.to_string())
            }
            "link" if is_stylesheet(el) => {
                let Some(href) = el.value().attr("href") else {
                    continue;
                };
                match base.join(href.trim()) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {
                        StyleSource::External(url.into())
                    }
                    _ => continue,
                }
            }
            _ => continue,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

fn svg_candidates(body: ElementRef<'_>, base: &Url, max: usize) -> Vec<SvgCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for img in body.select(&IMG) {
        if out.len() >= max {
            break;
        }
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        let trimmed = src.trim();
        let lower = trimmed.to_ascii_lowercase();
        if trimmed.is_empty()
            || ["data:", "blob:", "javascript:"]
                .iter()
                .any(|p| lower.starts_with(p))
        {
            continue;
        }

        let declared_svg = img
            .value()
            .attr("type")
            .map(|t| t.trim().eq_ignore_ascii_case("image/svg+xml"))
            .unwrap_or(false);
        if !declared_svg && !SVG_PATH.is_match(trimmed) {
            continue;
        }

        let Ok(url) = base.join(trimmed) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let url = url.to_string();
        if seen.insert(url.clone()) {
            out.push(SvgCandidate {
                src: src.to_string(),
                url,
            });
        }
    }
    out
}

fn snapshot(body: ElementRef<'_>) -> Snapshot {
    let mut snap = Snapshot::default();
    snap.tags.insert("html".to_string());

    for el in body.descendants().filter_map(ElementRef::wrap) {
        let value = el.value();
        if matches!(value.name(), "script" | "style" | "link") {
            continue;
        }
        snap.tags.insert(value.name().to_ascii_lowercase());
        for class in value.classes() {
            snap.classes.insert(class.to_string());
        }
        if let Some(id) = value.id() {
            snap.ids.insert(id.to_string());
        }
    }
    snap
}
