//! SVG validation and sanitizing

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

use crate::error::{Error, Result};
use crate::fetch::Resource;

/// Default upper bound on an inlined SVG, in bytes
pub const DEFAULT_MAX_INLINE_SVG_SIZE: usize = 32 * 1024;

/// Default number of SVG images fetched per page
pub const DEFAULT_MAX_SVG_FETCH: usize = 20;

static CSS_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)url\s*\([^)]*\)").expect("static regex"));

/// Elements removed together with their content
const DROPPED_ELEMENTS: &[&str] = &["script", "style", "foreignobject"];

/// Reject a fetched image that cannot be an inline SVG
pub fn check_svg_resource(resource: &Resource, max_size: usize) -> Result<()> {
    // an absent content type is accepted, the XML check decides
    if let Some(content_type) = resource.content_type.as_deref() {
        let content_type = content_type.to_ascii_lowercase();
        if !content_type.contains("svg") && !content_type.contains("xml") {
            return Err(Error::Svg(format!(
                "unexpected content type {:?}",
                content_type
            )));
        }
    }
    if let Some(len) = resource.content_length {
        if len > max_size as u64 {
            return Err(Error::Svg(format!("declared size {} over limit", len)));
        }
    }
    if resource.body.len() > max_size {
        return Err(Error::Svg(format!(
            "size {} over limit",
            resource.body.len()
        )));
    }
    Ok(())
}

/// Validate `text` as a single `<svg>` document and strip active content
///
/// Scripts and styles are removed with their content, together with event
/// handler attributes, links to http(s) resources and `url(...)` references
/// in `style` attributes.
pub fn sanitize_svg(text: &str, max_size: usize) -> Result<String> {
    if text.len() > max_size {
        return Err(Error::Svg(format!("size {} over limit", text.len())));
    }

    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    let mut depth = 0usize;
    let mut skip_until: Option<usize> = None;
    let mut seen_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::Svg(format!(
                "malformed XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Eof => break,
            Event::Start(e) => {
                if depth == 0 {
                    check_root(&e, &mut seen_root)?;
                }
                depth += 1;
                if skip_until.is_some() {
                    continue;
                }
                if is_dropped(&e) {
                    skip_until = Some(depth);
                    continue;
                }
                write(&mut writer, Event::Start(clean_start(&e)?))?;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    check_root(&e, &mut seen_root)?;
                }
                if skip_until.is_none() && !is_dropped(&e) {
                    write(&mut writer, Event::Empty(clean_start(&e)?))?;
                }
            }
            Event::End(e) => {
                if depth == 0 {
                    return Err(Error::Svg("unbalanced end tag".into()));
                }
                if skip_until == Some(depth) {
                    skip_until = None;
                } else if skip_until.is_none() {
                    write(&mut writer, Event::End(e))?;
                }
                depth -= 1;
            }
            Event::Text(t) => {
                if depth == 0 {
                    if t.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Err(Error::Svg("text outside the root element".into()));
                }
                if skip_until.is_none() {
                    write(&mut writer, Event::Text(t))?;
                }
            }
            Event::CData(c) => {
                if depth > 0 && skip_until.is_none() {
                    write(&mut writer, Event::CData(c))?;
                }
            }
            // declarations, comments, processing instructions and doctypes
            _ => {}
        }
    }

    if !seen_root {
        return Err(Error::Svg("no root element".into()));
    }
    if depth != 0 {
        return Err(Error::Svg("unclosed elements".into()));
    }

    String::from_utf8(writer.into_inner()).map_err(|e| Error::Svg(e.to_string()))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

fn check_root(e: &BytesStart<'_>, seen_root: &mut bool) -> Result<()> {
    if *seen_root {
        return Err(Error::Svg("more than one root element".into()));
    }
    let name = local_name(e);
    if name != "svg" {
        return Err(Error::Svg(format!("root element is <{}>", name)));
    }
    *seen_root = true;
    Ok(())
}

fn is_dropped(e: &BytesStart<'_>) -> bool {
    DROPPED_ELEMENTS.contains(&local_name(e).as_str())
}

fn is_external(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v.starts_with("http:") || v.starts_with("https:") || v.starts_with("//")
}

fn clean_start(e: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);

    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::Svg(format!("bad attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Svg(format!("bad attribute value: {}", e)))?
            .into_owned();

        let lower = key.to_ascii_lowercase();
        if lower.starts_with("on") {
            continue;
        }
        if (lower == "href" || lower.ends_with(":href")) && is_external(&value) {
            continue;
        }
        let value = if lower == "style" {
            CSS_URL.replace_all(&value, "none").into_owned()
        } else {
            value
        };
        out.push_attribute((key.as_str(), value.as_str()));
    }

    Ok(out)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::Svg(format!("write failed: {}", e)))
}
