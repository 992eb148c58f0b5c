//! Configuration payload parsing.
//!
//! A payload (a Helm `values.yaml`) is parsed into a [`ValuesNode`] tree.
//! Rule matching never inspects raw YAML; it walks the tree through a
//! [`ValuesVisitor`], which sees every scalar leaf with its dotted path
//! (`image.repository`, `sidecars[0].image`) in document order.

pub mod helm_values;

use crate::errors::AppError;

/// Tagged tree form of a configuration payload.
///
/// Map entries keep their document order.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuesNode {
    Null,
    Bool(bool),
    Number(String),
    String(String),
    List(Vec<ValuesNode>),
    Map(Vec<(String, ValuesNode)>),
}

impl ValuesNode {
    /// Text of a non-null scalar leaf.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null | Self::List(_) | Self::Map(_) => None,
        }
    }

    /// Walk every leaf depth-first in document order.
    pub fn walk<V: ValuesVisitor + ?Sized>(&self, visitor: &mut V) {
        let mut path = String::new();
        self.walk_at(&mut path, visitor);
    }

    fn walk_at<V: ValuesVisitor + ?Sized>(&self, path: &mut String, visitor: &mut V) {
        match self {
            Self::Map(entries) => {
                for (key, child) in entries {
                    let restore = path.len();
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(key);
                    child.walk_at(path, visitor);
                    path.truncate(restore);
                }
            }
            Self::List(items) => {
                for (index, child) in items.iter().enumerate() {
                    let restore = path.len();
                    path.push_str(&format!("[{index}]"));
                    child.walk_at(path, visitor);
                    path.truncate(restore);
                }
            }
            leaf => visitor.visit_leaf(path, leaf),
        }
    }

    /// Every leaf with its path, in traversal order.
    pub fn flatten(&self) -> Vec<(String, ValuesNode)> {
        let mut collector = LeafCollector::default();
        self.walk(&mut collector);
        collector.leaves
    }
}

/// Structural visitor over the leaves of a [`ValuesNode`] tree.
pub trait ValuesVisitor {
    fn visit_leaf(&mut self, path: &str, node: &ValuesNode);
}

#[derive(Debug, Default)]
struct LeafCollector {
    leaves: Vec<(String, ValuesNode)>,
}

impl ValuesVisitor for LeafCollector {
    fn visit_leaf(&mut self, path: &str, node: &ValuesNode) {
        self.leaves.push((path.to_string(), node.clone()));
    }
}

/// Turns raw payload text into a [`ValuesNode`] tree.
pub trait PayloadParser: Send + Sync {
    /// Parse a payload. Fails with [`AppError::MalformedPayload`].
    fn parse(&self, raw: &str) -> Result<ValuesNode, AppError>;

    /// Payload format this parser handles.
    fn format(&self) -> &str;
}
