//! Shared tag and attribute vocabulary
//!
//! Compact trees never carry tag or attribute names on the wire. Each name is
//! replaced by its position in one of the two tables below, which are compiled
//! into both the server and the client. Any edit that adds, removes or reorders
//! an entry must bump [`VOCABULARY_VERSION`]; peers built from different tables
//! decode to the wrong names without noticing.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Version of the tag and attribute tables
pub const VOCABULARY_VERSION: u16 = 1;

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Every entry, in wire-index order
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Markup name of this entry
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Look up an entry by its markup name (exact match)
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Wire index of this entry
            pub fn index(self) -> u8 {
                self as u8
            }

            pub fn from_index(index: u8) -> Option<Self> {
                Self::ALL.get(index as usize).copied()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u8(self.index())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let index = u8::deserialize(deserializer)?;
                Self::from_index(index).ok_or_else(|| {
                    de::Error::custom(format!(
                        "unknown {} index {} (vocabulary v{})",
                        stringify!($name),
                        index,
                        VOCABULARY_VERSION
                    ))
                })
            }
        }
    };
}

vocabulary! {
    /// HTML and inline SVG elements that survive compaction
    Tag {
        Html => "html",
        Head => "head",
        Body => "body",
        Title => "title",
        Meta => "meta",
        Link => "link",
        Style => "style",
        Header => "header",
        Footer => "footer",
        Main => "main",
        Section => "section",
        Article => "article",
        Aside => "aside",
        Nav => "nav",
        H1 => "h1",
        H2 => "h2",
        H3 => "h3",
        H4 => "h4",
        H5 => "h5",
        H6 => "h6",
        P => "p",
        Hr => "hr",
        Pre => "pre",
        Blockquote => "blockquote",
        Span => "span",
        A => "a",
        Abbr => "abbr",
        B => "b",
        I => "i",
        U => "u",
        Strong => "strong",
        Em => "em",
        Small => "small",
        Mark => "mark",
        Del => "del",
        Ins => "ins",
        Sub => "sub",
        Sup => "sup",
        Code => "code",
        Kbd => "kbd",
        Samp => "samp",
        Var => "var",
        Cite => "cite",
        Q => "q",
        Time => "time",
        Dfn => "dfn",
        Bdi => "bdi",
        Bdo => "bdo",
        S => "s",
        Strike => "strike",
        Ul => "ul",
        Ol => "ol",
        Li => "li",
        Dl => "dl",
        Dt => "dt",
        Dd => "dd",
        Table => "table",
        Thead => "thead",
        Tbody => "tbody",
        Tfoot => "tfoot",
        Tr => "tr",
        Td => "td",
        Th => "th",
        Caption => "caption",
        Colgroup => "colgroup",
        Col => "col",
        Form => "form",
        Label => "label",
        Input => "input",
        Textarea => "textarea",
        Button => "button",
        Select => "select",
        Option => "option",
        Optgroup => "optgroup",
        Fieldset => "fieldset",
        Legend => "legend",
        Datalist => "datalist",
        Output => "output",
        Progress => "progress",
        Meter => "meter",
        Img => "img",
        Picture => "picture",
        Source => "source",
        Svg => "svg",
        Path => "path",
        Circle => "circle",
        Rect => "rect",
        Line => "line",
        Polyline => "polyline",
        Polygon => "polygon",
        G => "g",
        Text => "text",
        Div => "div",
        Figure => "figure",
        Figcaption => "figcaption",
        Details => "details",
        Summary => "summary",
        Dialog => "dialog",
        Canvas => "canvas",
        Center => "center",
        Font => "font",
    }
}

vocabulary! {
    /// Attributes that survive compaction, on any element
    Attr {
        Href => "href",
        Src => "src",
        Alt => "alt",
        Title => "title",
        Class => "class",
        Id => "id",
        Style => "style",
        Width => "width",
        Height => "height",
        Rel => "rel",
        Type => "type",
        Color => "color",
        Bgcolor => "bgcolor",
        Name => "name",
        Cellpadding => "cellpadding",
        Cellspacing => "cellspacing",
        Colspan => "colspan",
        Rowspan => "rowspan",
        Align => "align",
        Valign => "valign",
        Border => "border",
        Disabled => "disabled",
        Readonly => "readonly",
        Value => "value",
        Placeholder => "placeholder",
        Autofocus => "autofocus",
        Required => "required",
        Step => "step",
        Checked => "checked",
        Selected => "selected",
        Multiple => "multiple",
        Link => "link",
        Text => "text",
        Vlink => "vlink",
        Fill => "fill",
        Stroke => "stroke",
        ViewBox => "viewBox",
        Xmlns => "xmlns",
        Version => "version",
        XlinkHref => "xlink:href",
        D => "d",
    }
}

impl Tag {
    /// Elements written without a closing tag
    pub fn is_void(self) -> bool {
        matches!(
            self,
            Tag::Meta | Tag::Link | Tag::Hr | Tag::Col | Tag::Input | Tag::Img | Tag::Source
        )
    }

    /// Elements whose text keeps its original whitespace
    pub fn preserves_whitespace(self) -> bool {
        matches!(self, Tag::Pre | Tag::Code | Tag::Textarea)
    }
}

impl Attr {
    /// Attributes carrying a URL
    pub fn is_url(self) -> bool {
        matches!(self, Attr::Href | Attr::Src | Attr::XlinkHref)
    }
}
