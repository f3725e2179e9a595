//! Compact page payload
//!
//! The server ships a page as a [`PagePayload`]: a tree of [`CompactNode`]s
//! whose tags and attributes are vocabulary indices, the purged stylesheet, the
//! attributes of `<html>` and `<body>`, and a map of inlined SVG images keyed by
//! their original `src`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::Result;
use crate::vocab::{Attr, Tag};

/// Notice shipped when a page needs more fragments than allowed
pub const PAGE_TOO_LARGE: &str = "Page too large";

/// Notice shipped when the upstream fetch times out
pub const TIMEOUT_NOTICE: &str = "Timeout loading page";

/// Notice shipped when the upstream fetch fails
pub const ERROR_NOTICE: &str = "Error loading page";

/// A node of the compact tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompactNode {
    Text(String),
    Element(ElementNode),
}

impl CompactNode {
    pub fn text(text: impl Into<String>) -> Self {
        CompactNode::Text(text.into())
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            CompactNode::Element(el) => Some(el),
            CompactNode::Text(_) => None,
        }
    }
}

impl From<ElementNode> for CompactNode {
    fn from(el: ElementNode) -> Self {
        CompactNode::Element(el)
    }
}

/// An element of the compact tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementNode {
    #[serde(rename = "t")]
    pub tag: Tag,

    /// Attributes in document order
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<(Attr, String)>,

    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CompactNode>,
}

impl ElementNode {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute append
    pub fn with_attr(mut self, attr: Attr, value: impl Into<String>) -> Self {
        self.attrs.push((attr, value.into()));
        self
    }

    /// Builder-style child append
    pub fn with_child(mut self, child: impl Into<CompactNode>) -> Self {
        self.children.push(child.into());
        self
    }

    /// First value of `attr`, if present
    pub fn attr(&self, attr: Attr) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(a, _)| *a == attr)
            .map(|(_, v)| v.as_str())
    }
}

/// Everything the client needs to rebuild a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePayload {
    #[serde(default)]
    pub dom: Vec<CompactNode>,

    #[serde(default)]
    pub styles: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub html_attrs: BTreeMap<Attr, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub body_attrs: BTreeMap<Attr, String>,

    /// Sanitized SVG markup keyed by the original image `src`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub imgs: BTreeMap<String, String>,
}

impl PagePayload {
    /// A payload that shows a single line of text
    pub fn notice(message: &str) -> Self {
        Self {
            dom: vec![CompactNode::text(message)],
            ..Default::default()
        }
    }

    pub fn compress(&self) -> Result<String> {
        codec::compress(self)
    }

    pub fn decompress(text: &str) -> Result<Self> {
        codec::decompress(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PagePayload {
        let link = ElementNode::new(Tag::A)
            .with_attr(Attr::Href, "/about")
            .with_child(CompactNode::text("About"));
        let para = ElementNode::new(Tag::P)
            .with_attr(Attr::Class, "lead")
            .with_child(CompactNode::text("Hello "))
            .with_child(link);

        let mut payload = PagePayload {
            dom: vec![para.into()],
            styles: "p{color:red}".into(),
            ..Default::default()
        };
        payload.body_attrs.insert(Attr::Bgcolor, "#fff".into());
        payload
            .imgs
            .insert("logo.svg".into(), "<svg xmlns=\"http://www.w3.org/2000/svg\"/>".into());
        payload
    }

    #[test]
    fn test_compact_json_shape() {
        let node: CompactNode = ElementNode::new(Tag::P)
            .with_attr(Attr::Id, "x")
            .with_child(CompactNode::text("hi"))
            .into();
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"t":20,"a":[[5,"x"]],"c":["hi"]}"#);

        let bare: CompactNode = ElementNode::new(Tag::Hr).into();
        assert_eq!(serde_json::to_string(&bare).unwrap(), r#"{"t":21}"#);
    }

    #[test]
    fn test_payload_survives_compression() {
        let payload = sample();
        let text = payload.compress().unwrap();
        let back = PagePayload::decompress(&text).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_attribute_maps_use_string_keys() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains(r##""bodyAttrs":{"12":"#fff"}"##));
        assert!(!json.contains("htmlAttrs"));
    }

    #[test]
    fn test_notice() {
        let payload = PagePayload::notice(TIMEOUT_NOTICE);
        assert_eq!(payload.dom, vec![CompactNode::text("Timeout loading page")]);
        assert!(payload.styles.is_empty());
    }

    #[test]
    fn test_attr_lookup() {
        let el = ElementNode::new(Tag::Img)
            .with_attr(Attr::Src, "a.svg")
            .with_attr(Attr::Alt, "logo");
        assert_eq!(el.attr(Attr::Alt), Some("logo"));
        assert_eq!(el.attr(Attr::Title), None);
    }
}
