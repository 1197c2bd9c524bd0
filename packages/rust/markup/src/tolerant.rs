//! Tolerant parsing of near-HTML markup into a [`MarkupTree`].
//!
//! The primary path first rewrites the input so quick-xml can tokenize it
//! (see [`prepare`]), then runs quick-xml in lenient mode and repairs
//! structure with an open-element stack. The HTML5 path is used only as an
//! opt-in fallback; it lower-cases tag names.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use scraper::{Html, Node};
use tracing::trace;

use docforest_shared::{DocForestError, Result};

use crate::tree::{ElementData, MarkupNode, MarkupTree};

/// HTML elements that never have content.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text, not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

/// Parse markup leniently, preserving tag-name case.
///
/// - `<x/>` closes immediately; void elements never take children
/// - an end tag closes up to the nearest open element of that name
///   (exact match first, then ASCII case-insensitive); unmatched end tags are dropped
/// - elements still open at end of input are closed
/// - `script`/`style` content and a `<` that cannot open a tag are text
/// - `<!...>` markup other than comments and CDATA is a non-element node
pub fn parse(text: &str) -> Result<MarkupTree> {
    let prepared = prepare(text);
    let mut reader = Reader::from_str(&prepared);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.check_comments = false;
    }

    let mut tree = MarkupTree::new(MarkupNode::Document);
    let root = tree.root().id();
    // Open elements as (tree id, tag name); bottom of the stack is the document.
    let mut open: Vec<(ego_tree::NodeId, String)> = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(DocForestError::parse(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        };
        let parent = open.last().map(|(id, _)| *id).unwrap_or(root);

        match event {
            Event::Start(start) => {
                let element = element_data(&start);
                let name = element.name.clone();
                let id = append(&mut tree, parent, MarkupNode::Element(element))?;
                if !is_void(&name) {
                    open.push((id, name));
                }
            }
            Event::Empty(start) => {
                append(&mut tree, parent, MarkupNode::Element(element_data(&start)))?;
            }
            Event::End(end) => {
                let name = lossy(end.name().as_ref());
                match find_open(&open, &name) {
                    Some(depth) => open.truncate(depth),
                    None => trace!(%name, "dropping unmatched end tag"),
                }
            }
            Event::Text(text) => {
                append(&mut tree, parent, MarkupNode::Text(lossy(&text)))?;
            }
            Event::CData(cdata) => {
                append(&mut tree, parent, MarkupNode::Text(lossy(&cdata)))?;
            }
            Event::Comment(_) => {
                append(&mut tree, parent, MarkupNode::Comment)?;
            }
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {
                append(&mut tree, parent, MarkupNode::Other)?;
            }
            Event::Eof => break,
        }
    }

    Ok(tree)
}

/// Parse with an HTML5 fragment parser (scraper / html5ever).
///
/// Never fails; tag names come back lower-cased and HTML content models apply
/// (so `<b/>` does not self-close).
pub fn parse_html5(text: &str) -> MarkupTree {
    let fragment = Html::parse_fragment(text);
    let mut tree = MarkupTree::new(MarkupNode::Document);
    let root = tree.root().id();

    // The fragment parser wraps content in a synthetic <html> element.
    let container = fragment.root_element();
    let mut pending: Vec<_> = container.children().map(|child| (child, root)).collect();
    pending.reverse();

    while let Some((source, parent)) = pending.pop() {
        let node = match source.value() {
            Node::Element(element) => {
                let mut data = ElementData::new(element.name());
                data.attributes = element
                    .attrs()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect();
                MarkupNode::Element(data)
            }
            Node::Text(text) => MarkupNode::Text(text.to_string()),
            Node::Comment(_) => MarkupNode::Comment,
            _ => MarkupNode::Other,
        };

        let Some(mut target) = tree.get_mut(parent) else {
            continue;
        };
        let id = target.append(node).id();

        let mut children: Vec<_> = source.children().map(|child| (child, id)).collect();
        children.reverse();
        pending.extend(children);
    }

    tree
}

// ---------------------------------------------------------------------------
// Pre-scan
// ---------------------------------------------------------------------------

/// Rewrite near-HTML into input the lenient quick-xml reader accepts.
///
/// - a `<` not followed by a name-start character, `/`, `!` or `?` becomes `&lt;`
/// - the content of `script`/`style` up to its end tag (ASCII case-insensitive)
///   has every `<` escaped, so it arrives as a single text event
/// - `<!...>` that is neither a comment nor CDATA (doctypes, downlevel
///   conditionals such as `<![if !supportLists]>`) becomes a processing
///   instruction
/// - an unterminated comment or CDATA section runs to the end of input
/// - comments, CDATA and processing instructions are copied whole
///
/// Everything else is copied verbatim, including an unterminated tag.
pub(crate) fn prepare(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut rest = text;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        rest = &rest[lt..];
        let after = &rest[1..];

        if after.starts_with("!--") {
            match after[3..].find("-->") {
                Some(end) => {
                    let len = 1 + 3 + end + 3;
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                }
                None => {
                    out.push_str(rest);
                    out.push_str("-->");
                    rest = "";
                }
            }
        } else if after.starts_with("![CDATA[") {
            match after.find("]]>") {
                Some(end) => {
                    let len = 1 + end + 3;
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                }
                None => {
                    out.push_str(rest);
                    out.push_str("]]>");
                    rest = "";
                }
            }
        } else if let Some(bang) = after.strip_prefix('!') {
            match bang.find('>') {
                Some(end) => {
                    out.push_str("<?");
                    out.push_str(&bang[..end]);
                    out.push_str("?>");
                    rest = &bang[end + 1..];
                }
                None => {
                    out.push_str("&lt;");
                    rest = after;
                }
            }
        } else if after.starts_with('?') {
            match after.find("?>") {
                Some(end) => {
                    let len = 1 + end + 2;
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                }
                None => {
                    out.push_str("&lt;");
                    rest = after;
                }
            }
        } else if let Some(closing) = after.strip_prefix('/') {
            if closing.chars().next().is_some_and(is_name_start) {
                out.push_str("</");
            } else {
                out.push_str("&lt;/");
            }
            rest = closing;
        } else if after.chars().next().is_some_and(is_name_start) {
            let Some(tag_len) = tag_length(rest) else {
                // Unterminated tag: leave it for the reader to report.
                out.push_str(rest);
                rest = "";
                break;
            };
            let tag = &rest[..tag_len];
            out.push_str(tag);
            rest = &rest[tag_len..];

            if let Some(name) = raw_text_element(tag) {
                let end = find_end_tag(rest, name).unwrap_or(rest.len());
                push_escaped(&mut out, &rest[..end]);
                rest = &rest[end..];
            }
        } else {
            out.push_str("&lt;");
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

/// Byte length of the start tag at the beginning of `s`, honouring quoted
/// attribute values. `None` when the tag never closes.
fn tag_length(s: &str) -> Option<usize> {
    let mut quote = None;
    for (i, b) in s.bytes().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// The raw-text element name when `tag` opens one (and does not self-close).
fn raw_text_element(tag: &str) -> Option<&'static str> {
    if tag.ends_with("/>") {
        return None;
    }
    let name_end = tag[1..]
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .map_or(tag.len(), |i| i + 1);
    let name = &tag[1..name_end];
    RAW_TEXT_ELEMENTS
        .iter()
        .copied()
        .find(|raw| raw.eq_ignore_ascii_case(name))
}

/// Offset of the first `</name` (ASCII case-insensitive) that ends a tag name.
fn find_end_tag(s: &str, name: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let needle_len = name.len() + 2;
    let mut from = 0;
    while let Some(pos) = s[from..].find("</") {
        let start = from + pos;
        let candidate = bytes.get(start + 2..start + needle_len)?;
        let boundary = bytes
            .get(start + needle_len)
            .is_none_or(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/');
        if candidate.eq_ignore_ascii_case(name.as_bytes()) && boundary {
            return Some(start);
        }
        from = start + 2;
    }
    None
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        if c == '<' {
            out.push_str("&lt;");
        } else {
            out.push(c);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn append(
    tree: &mut MarkupTree,
    parent: ego_tree::NodeId,
    node: MarkupNode,
) -> Result<ego_tree::NodeId> {
    let mut parent = tree
        .get_mut(parent)
        .ok_or_else(|| DocForestError::parse("open element vanished from the tree"))?;
    Ok(parent.append(node).id())
}

/// Stack depth to truncate to when closing `name`, if it is open.
fn find_open(open: &[(ego_tree::NodeId, String)], name: &str) -> Option<usize> {
    open.iter()
        .rposition(|(_, open_name)| open_name == name)
        .or_else(|| {
            open.iter()
                .rposition(|(_, open_name)| open_name.eq_ignore_ascii_case(name))
        })
}

fn element_data(start: &BytesStart<'_>) -> ElementData {
    let mut data = ElementData::new(lossy(start.name().as_ref()));
    for attr in start.html_attributes().with_checks(false) {
        // A broken attribute ends attribute parsing for this element.
        let Ok(attr) = attr else { break };
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => lossy(&attr.value),
        };
        data.attributes.push((lossy(attr.key.as_ref()), value));
    }
    data
}

fn lossy(bytes: &[u8]) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => s.to_owned(),
        Cow::Owned(s) => s,
    }
}
