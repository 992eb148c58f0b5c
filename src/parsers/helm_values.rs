//! Helm `values.yaml` payload parser.

use serde_yaml::Value;

use crate::errors::AppError;
use crate::parsers::{PayloadParser, ValuesNode};

/// Parses Helm values documents with `serde_yaml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelmValuesParser;

impl PayloadParser for HelmValuesParser {
    fn parse(&self, raw: &str) -> Result<ValuesNode, AppError> {
        let value: Value = serde_yaml::from_str(raw)
            .map_err(|e| AppError::MalformedPayload(format!("invalid values.yaml: {e}")))?;

        match convert(value)? {
            // An empty document is an empty mapping.
            ValuesNode::Null => Ok(ValuesNode::Map(Vec::new())),
            node @ ValuesNode::Map(_) => Ok(node),
            _ => Err(AppError::MalformedPayload(
                "values.yaml root must be a mapping".to_string(),
            )),
        }
    }

    fn format(&self) -> &str {
        "helm-values"
    }
}

fn convert(value: Value) -> Result<ValuesNode, AppError> {
    Ok(match value {
        Value::Null => ValuesNode::Null,
        Value::Bool(b) => ValuesNode::Bool(b),
        Value::Number(n) => ValuesNode::Number(n.to_string()),
        Value::String(s) => ValuesNode::String(s),
        Value::Sequence(items) => {
            ValuesNode::List(items.into_iter().map(convert).collect::<Result<_, _>>()?)
        }
        Value::Mapping(mapping) => {
            let mut entries = Vec::with_capacity(mapping.len());
            for (key, child) in mapping {
                entries.push((key_text(key)?, convert(child)?));
            }
            ValuesNode::Map(entries)
        }
        Value::Tagged(tagged) => convert(tagged.value)?,
    })
}

fn key_text(key: Value) -> Result<String, AppError> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        other => Err(AppError::MalformedPayload(format!(
            "unsupported mapping key in values.yaml: {other:?}"
        ))),
    }
}
