use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

/// A generic element tree: the detailed report as it arrives, before any
/// interpretation. Children are always a sequence, whatever the source
/// format did with singletons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<RawNode>,
}

impl RawNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_child(mut self, child: RawNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute value, or an empty string when absent.
    pub fn attr_or_empty(&self, key: &str) -> String {
        self.attr(key).unwrap_or_default().to_string()
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RawNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// All descendants reached by following `path` one element name at a time.
    pub fn descendants<'a>(&'a self, path: &[&str]) -> Vec<&'a RawNode> {
        let mut current = vec![self];
        for segment in path {
            current = current
                .into_iter()
                .flat_map(|n| n.children.iter())
                .filter(|c| c.name == *segment)
                .collect();
        }
        current
    }

    /// Every element called `name` in the tree, self included, in document order.
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a RawNode> {
        let mut found = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            if node.name == name {
                found.push(node);
            }
            pending.extend(node.children.iter().rev());
        }
        found
    }

    /// Depth-first search for the first element carrying `key`.
    pub fn find_attr(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.attr(key) {
            return Some(v);
        }
        self.children.iter().find_map(|c| c.find_attr(key))
    }

    pub fn parse_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<RawNode> = Vec::new();
        let mut root: Option<RawNode> = None;

        loop {
            match reader
                .read_event()
                .with_context(|| format!("XML error at byte {}", reader.buffer_position()))?
            {
                Event::Start(e) => stack.push(element(&e)?),
                Event::Empty(e) => attach(&mut stack, &mut root, element(&e)?)?,
                Event::End(_) => {
                    let node = stack.pop().context("unbalanced closing tag")?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            bail!("unexpected end of document inside <{}>", stack[stack.len() - 1].name);
        }
        root.context("document has no root element")
    }

    /// Build a tree from an xmltodict-style JSON document: a single-key
    /// object naming the root, `@`-prefixed attribute keys, `#text` for
    /// text content, and child values that are either one object or a list.
    pub fn from_json_document(doc: &Value) -> Result<Self> {
        let obj = doc.as_object().context("report document must be a JSON object")?;
        let mut entries = obj.iter().filter(|(k, _)| !k.starts_with('@') && !k.starts_with('#'));
        let (name, value) = entries.next().context("report document has no root element")?;
        if entries.next().is_some() {
            bail!("report document has more than one root element");
        }
        Ok(Self::from_json(name, value))
    }

    fn from_json(name: &str, value: &Value) -> Self {
        let mut node = RawNode::new(local_name(name));
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    if let Some(attr) = key.strip_prefix('@') {
                        node.attributes.insert(local_name(attr).to_string(), scalar(v));
                    } else if key == "#text" {
                        node.text = scalar(v);
                    } else {
                        for item in one_or_many(v) {
                            node.children.push(Self::from_json(key, item));
                        }
                    }
                }
            }
            Value::Null => {}
            other => node.text = scalar(other),
        }
        node
    }
}

fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn element(start: &BytesStart<'_>) -> Result<RawNode> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut node = RawNode::new(name);
    for attr in start.attributes() {
        let attr = attr.context("malformed attribute")?;
        let key = attr.key.local_name();
        let key = String::from_utf8_lossy(key.as_ref()).into_owned();
        if key == "xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let value = attr.unescape_value()?.into_owned();
        node.attributes.insert(key, value);
    }
    Ok(node)
}

fn attach(stack: &mut [RawNode], root: &mut Option<RawNode>, node: RawNode) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    } else {
        bail!("document has more than one root element");
    }
    Ok(())
}
