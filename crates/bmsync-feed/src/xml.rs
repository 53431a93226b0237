//! Minimal element tree over `quick_xml` events. Text is kept exactly as written.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    /// Qualified name as written, prefix included (`dc:subject`).
    pub name: String,
    /// Attributes keyed by local name (`rdf:about` is stored as `about`).
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

fn markup_error(err: impl std::fmt::Display) -> ParseError {
    ParseError::Markup(err.to_string())
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(markup_error)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(markup_error)?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            children: Vec::new(),
        })
    }

    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == local_name)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |el| el.name == name)
    }

    pub fn child<'a>(&'a self, name: &'a str) -> Option<&'a Element> {
        self.children_named(name).next()
    }

    /// Concatenated direct text and CDATA, untrimmed.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Text for text-only elements; serialized inner markup when the element
    /// has element children, so embedded markup is never dropped.
    pub fn content(&self) -> String {
        if self.elements().next().is_none() {
            self.text()
        } else {
            self.inner_markup()
        }
    }

    pub fn inner_markup(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            write_node(node, &mut out);
        }
        out
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(&escape(text.as_str())),
        Node::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attributes {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape(value.as_str()));
                out.push('"');
            }
            if el.children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

/// Parses `xml` into its root element.
pub(crate) fn parse_document(xml: &str) -> Result<Element, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::Markup("unexpected closing tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let text = text.unescape().map_err(markup_error)?;
                    parent.children.push(Node::Text(text.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Text(String::from_utf8_lossy(&data).into_owned()));
                }
            }
            Event::Eof if stack.is_empty() => return Err(ParseError::Empty),
            Event::Eof => {
                return Err(ParseError::Markup(format!(
                    "document ends inside <{}>",
                    stack.last().map(|el| el.name.as_str()).unwrap_or_default()
                )))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_keeps_surrounding_whitespace_and_cdata() {
        let root = parse_document("<a>  one &amp; <![CDATA[<two>]]>  </a>").expect("parse");
        assert_eq!(root.text(), "  one & <two>  ");
    }

    #[test]
    fn nested_markup_is_serialized_back() {
        let root =
            parse_document(r#"<div>My <b class="x">note</b> &lt;3<br/></div>"#).expect("parse");
        assert_eq!(root.content(), r#"My <b class="x">note</b> &lt;3<br/>"#);
    }

    #[test]
    fn prefixed_names_and_attributes() {
        let root = parse_document(
            r#"<rdf:RDF xmlns:rdf="r"><item rdf:about="http://x/1#a"><dc:subject>t</dc:subject></item></rdf:RDF>"#,
        )
        .expect("parse");
        assert_eq!(root.local_name(), "RDF");
        let item = root.child("item").expect("item");
        assert_eq!(item.attr("about"), Some("http://x/1#a"));
        assert_eq!(item.child("dc:subject").map(Element::text).as_deref(), Some("t"));
    }

    #[test]
    fn unclosed_document_is_an_error() {
        assert!(parse_document("<rss><channel>").is_err());
        assert!(matches!(parse_document("   "), Err(ParseError::Empty)));
    }
}
