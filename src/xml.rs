//! Minimal XML element tree built from `quick-xml` events.
//!
//! Feed and PubMed documents are small and irregular; walking a tree by
//! element name is simpler than mapping every dialect onto serde structs.
//! Element names keep their namespace prefix (`content:encoded`,
//! `atom:link`) so prefixed and unprefixed elements never collide.

use crate::error::{IngestError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// All text inside the element, descendants included, in document order.
    pub text: String,
}

impl XmlElement {
    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<XmlElement> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(Self::open(&e)?),
                Event::Empty(e) => {
                    let element = Self::open(&e)?;
                    Self::close(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        IngestError::Parse("unexpected closing tag".to_string())
                    })?;
                    Self::close(&mut stack, &mut root, element);
                }
                Event::Text(e) => {
                    Self::append_text(&mut stack, &String::from_utf8_lossy(&e));
                }
                Event::CData(e) => {
                    Self::append_text(&mut stack, &String::from_utf8_lossy(&e));
                }
                Event::GeneralRef(e) => {
                    let name = String::from_utf8_lossy(&e).into_owned();
                    // Undeclared entities (HTML `&nbsp;` in sloppy feeds) stay literal.
                    let resolved = resolve_reference(&name).unwrap_or_else(|| format!("&{name};"));
                    Self::append_text(&mut stack, &resolved);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(IngestError::Parse(format!(
                "document ended inside <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| IngestError::Parse("document has no root element".to_string()))
    }

    fn open(start: &BytesStart<'_>) -> Result<XmlElement> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| IngestError::Parse(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            let value = quick_xml::escape::unescape(&raw)
                .map(|v| v.into_owned())
                .unwrap_or(raw);
            attributes.push((key, value));
        }
        Ok(XmlElement {
            name,
            attributes,
            ..XmlElement::default()
        })
    }

    fn close(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, element: XmlElement) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => {
                if root.is_none() {
                    *root = Some(element);
                }
            }
        }
    }

    fn append_text(stack: &mut [XmlElement], text: &str) {
        for element in stack.iter_mut() {
            element.text.push_str(text);
        }
    }

    /// Local part of the element name (`encoded` for `content:encoded`).
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// First direct child with the given (qualified) name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given (qualified) name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a path of child names, taking the first match at each level.
    pub fn path(&self, names: &[&str]) -> Option<&XmlElement> {
        names.iter().try_fold(self, |element, name| element.child(name))
    }

    /// Trimmed text of the child at `names`, if present and non-empty.
    pub fn text_at(&self, names: &[&str]) -> Option<String> {
        self.path(names)
            .map(|e| e.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Resolve a predefined or numeric character reference by name (without `&`/`;`).
fn resolve_reference(name: &str) -> Option<String> {
    let resolved = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)?
        }
    };
    Some(resolved.to_string())
}
