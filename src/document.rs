//! Path-addressable source documents.
//!
//! A [`SourceDocument`] is a tree of named [`Node`]s. Each node carries
//! optional text and an ordered list of children; sibling names may repeat
//! (repeating groups such as several coverages under one risk). The root is a
//! nameless container whose children are the document's top-level elements.
//!
//! Documents are built by the caller, either through the builder methods or
//! from natural JSON via [`SourceDocument::from_json`].

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use serde_json::Value as JsonValue;

const TEXT_KEY: &str = "#text";
const ATTRIBUTES_KEY: &str = "@attributes";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub text: Option<String>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// First child named `name`.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDocument {
    root: Node,
}

impl SourceDocument {
    pub fn new(top_level: Vec<Node>) -> Self {
        Self {
            root: Node {
                name: String::new(),
                text: None,
                children: top_level,
            },
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Number of source rows one document contributes to a table load.
    ///
    /// Repeating groups are not expanded into rows, so a document always
    /// counts as one.
    pub fn cardinality(&self) -> u64 {
        1
    }

    /// Builds a document from natural JSON.
    ///
    /// Objects become children, arrays become repeated children sharing the
    /// key's name, and scalars become node text. A `#text` key sets the text
    /// of the enclosing node and `@attributes` entries become child nodes.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            bail!("Source document must be a JSON object at the top level");
        };
        let mut root = Node::new("");
        for (key, child) in map {
            append_json_children(&mut root, key, child)?;
        }
        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Reading source document {path:?}"))?;
        let value: JsonValue = serde_json::from_str(&contents)
            .with_context(|| format!("Parsing source document {path:?} as JSON"))?;
        Self::from_json(&value).with_context(|| format!("Building document tree from {path:?}"))
    }
}

fn append_json_children(parent: &mut Node, key: &str, value: &JsonValue) -> Result<()> {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                if item.is_array() {
                    bail!("Nested arrays under '{key}' cannot be addressed by path");
                }
                append_json_children(parent, key, item)?;
            }
        }
        other => parent.children.push(json_to_node(key, other)?),
    }
    Ok(())
}

fn json_to_node(name: &str, value: &JsonValue) -> Result<Node> {
    let mut node = Node::new(name);
    match value {
        JsonValue::Null => {}
        JsonValue::Bool(b) => node.text = Some(b.to_string()),
        JsonValue::Number(n) => node.text = Some(n.to_string()),
        JsonValue::String(s) => node.text = Some(s.clone()),
        JsonValue::Object(map) => {
            for (key, child) in map {
                match key.as_str() {
                    TEXT_KEY => node.text = scalar_text(child),
                    ATTRIBUTES_KEY => {
                        if let JsonValue::Object(attributes) = child {
                            for (attr, attr_value) in attributes {
                                node.children.push(json_to_node(attr, attr_value)?);
                            }
                        }
                    }
                    _ => append_json_children(&mut node, key, child)?,
                }
            }
        }
        JsonValue::Array(_) => bail!("Nested arrays under '{name}' cannot be addressed by path"),
    }
    Ok(node)
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
