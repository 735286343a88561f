//! A small owned XML tree built on quick-xml.
//!
//! OData XML payloads (service documents, Atom feeds, CSDL, errors) are small
//! enough that rules are far easier to write against a tree than against a
//! pull parser.

use crate::utils::error::{Result, ValidatorError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

/// 樹的最大深度；drop 與走訪都是遞迴，過深的文件直接拒絕
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub local_name: String,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn parse(body: &str) -> Result<Self> {
        let mut reader = Reader::from_str(body);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        // 每一層的 namespace 宣告 (prefix -> uri)
        let mut scopes: Vec<BTreeMap<String, String>> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(ValidatorError::PayloadError {
                            message: format!("XML document nests deeper than {} elements", MAX_DEPTH),
                        });
                    }
                    let (element, declared) = Self::from_start(&e, &scopes)?;
                    scopes.push(declared);
                    stack.push(element);
                }
                Event::Empty(e) => {
                    let (element, _) = Self::from_start(&e, &scopes)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(_) => {
                    scopes.pop();
                    let element = stack.pop().ok_or_else(|| ValidatorError::PayloadError {
                        message: "unbalanced XML end tag".to_string(),
                    })?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(t) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => {
                    return Err(ValidatorError::PayloadError {
                        message: "XML document has no complete root element".to_string(),
                    })
                }
                _ => {}
            }
        }
    }

    fn from_start(
        e: &BytesStart<'_>,
        scopes: &[BTreeMap<String, String>],
    ) -> Result<(Self, BTreeMap<String, String>)> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let (prefix, local_name) = match name.split_once(':') {
            Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
            None => (None, name.clone()),
        };

        let mut attributes = BTreeMap::new();
        let mut declared = BTreeMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();

            if key == "xmlns" {
                declared.insert(String::new(), value.clone());
            } else if let Some(ns_prefix) = key.strip_prefix("xmlns:") {
                declared.insert(ns_prefix.to_string(), value.clone());
            }
            attributes.insert(key, value);
        }

        let lookup = prefix.clone().unwrap_or_default();
        let namespace = declared.get(&lookup).cloned().or_else(|| {
            scopes
                .iter()
                .rev()
                .find_map(|scope| scope.get(&lookup).cloned())
        });

        Ok((
            Self {
                name,
                local_name,
                prefix,
                namespace,
                attributes,
                children: Vec::new(),
                text: String::new(),
            },
            declared,
        ))
    }

    /// Attribute by exact (possibly prefixed) name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute by local name, ignoring any prefix. Namespace declarations are skipped.
    pub fn attr_local(&self, local: &str) -> Option<&str> {
        self.attributes.iter().find_map(|(key, value)| {
            if key.starts_with("xmlns") {
                return None;
            }
            let key_local = key.rsplit(':').next().unwrap_or(key);
            (key_local == local).then_some(value.as_str())
        })
    }

    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name == local)
    }

    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.local_name == local)
    }

    /// Document order, excluding `self`.
    pub fn descendants_named(&self, local: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        let mut pending: Vec<&XmlElement> = self.children.iter().rev().collect();
        while let Some(element) = pending.pop() {
            if element.local_name == local {
                found.push(element);
            }
            pending.extend(element.children.iter().rev());
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolves_namespaces() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Demo" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Product"/>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

        let root = XmlElement::parse(xml).unwrap();
        assert_eq!(root.local_name, "Edmx");
        assert_eq!(root.prefix.as_deref(), Some("edmx"));
        assert_eq!(
            root.namespace.as_deref(),
            Some("http://docs.oasis-open.org/odata/ns/edmx")
        );
        assert_eq!(root.attr("Version"), Some("4.0"));

        let schema = &root.descendants_named("Schema")[0];
        assert_eq!(
            schema.namespace.as_deref(),
            Some("http://docs.oasis-open.org/odata/ns/edm")
        );
        let entity_type = schema.child("EntityType").unwrap();
        assert_eq!(entity_type.attr("Name"), Some("Product"));
    }

    #[test]
    fn test_text_and_local_attributes() {
        let xml = r#"<m:error xmlns:m="http://docs.oasis-open.org/odata/ns/metadata"><m:code>400</m:code><m:message xml:lang="en">Bad &amp; wrong</m:message></m:error>"#;
        let root = XmlElement::parse(xml).unwrap();

        assert_eq!(root.child("code").unwrap().text, "400");
        let message = root.child("message").unwrap();
        assert_eq!(message.text, "Bad & wrong");
        assert_eq!(message.attr_local("lang"), Some("en"));
    }

    #[test]
    fn test_deeply_nested_document_is_rejected() {
        let depth = 200_000;
        let xml = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let err = XmlElement::parse(&xml).unwrap_err();
        assert!(matches!(err, ValidatorError::PayloadError { message } if message.contains("deeper")));

        let at_limit = format!("{}{}", "<a>".repeat(MAX_DEPTH), "</a>".repeat(MAX_DEPTH));
        let root = XmlElement::parse(&at_limit).unwrap();
        assert_eq!(root.descendants_named("a").len(), MAX_DEPTH - 1);
    }

    #[test]
    fn test_descendants_in_document_order() {
        let root = XmlElement::parse("<r><x id=\"1\"><x id=\"2\"/></x><y><x id=\"3\"/></y></r>").unwrap();
        let ids: Vec<&str> = root
            .descendants_named("x")
            .iter()
            .filter_map(|x| x.attr("id"))
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        assert!(XmlElement::parse("<feed><entry>").is_err());
        assert!(XmlElement::parse("").is_err());
    }
}
