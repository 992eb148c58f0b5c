//! Container image extraction from Helm values using searching rules.
//!
//! A rule names up to three leaf paths (repo, image, tag). The first non-empty
//! of image, repo, tag is the anchor: every leaf path of the document is
//! tested against it in traversal order. `$*` in a pattern matches any path
//! prefix; the prefix captured on the anchor is substituted into the other
//! components before they are looked up. Containers therefore come out in
//! document order, whatever order the rules are in.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::errors::AppError;
use crate::models::product::MatchRule;
use crate::models::service::{Container, ImagePathSpec};
use crate::parsers::ValuesNode;

/// Placeholder standing for a path prefix discovered in the document.
pub const PATH_PLACEHOLDER: &str = "$*";

/// Rules applied to projects that never saved their own.
pub fn preset_rules() -> Vec<MatchRule> {
    let patterns: [(&str, &str); 4] = [
        ("image.repository", "image.tag"),
        ("image", ""),
        ("$*.image.repository", "$*.image.tag"),
        ("$*.image", ""),
    ];

    patterns
        .iter()
        .zip(1..)
        .map(|((image, tag), preset_id)| MatchRule {
            repo: String::new(),
            image: (*image).to_string(),
            tag: (*tag).to_string(),
            in_use: true,
            preset_id,
        })
        .collect()
}

#[derive(Debug)]
struct CompiledRule {
    anchor: Regex,
    repo: Option<String>,
    image: Option<String>,
    tag: Option<String>,
}

impl CompiledRule {
    /// `None` for inactive or blank rules.
    fn compile(rule: &MatchRule) -> Result<Option<Self>, AppError> {
        if !rule.in_use || rule.is_blank() {
            return Ok(None);
        }

        let component = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let (repo, image, tag) = (
            component(&rule.repo),
            component(&rule.image),
            component(&rule.tag),
        );

        for pattern in [&repo, &image, &tag].into_iter().flatten() {
            if pattern.matches(PATH_PLACEHOLDER).count() > 1 {
                return Err(AppError::Validation(format!(
                    "pattern '{pattern}' may contain '{PATH_PLACEHOLDER}' at most once"
                )));
            }
        }

        let anchor_pattern = image
            .as_deref()
            .or(repo.as_deref())
            .or(tag.as_deref())
            .unwrap_or_default();

        Ok(Some(Self {
            anchor: anchor_regex(anchor_pattern)?,
            repo,
            image,
            tag,
        }))
    }

    /// Prefix captured when `path` matches the anchor.
    fn match_anchor(&self, path: &str) -> Option<String> {
        let caps = self.anchor.captures(path)?;
        Some(
            caps.get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        )
    }

    fn resolve(&self, prefix: &str) -> ImagePathSpec {
        let fill = |p: &Option<String>| p.as_ref().map(|p| p.replace(PATH_PLACEHOLDER, prefix));
        ImagePathSpec {
            repo: fill(&self.repo),
            image: fill(&self.image),
            tag: fill(&self.tag),
        }
    }
}

fn anchor_regex(pattern: &str) -> Result<Regex, AppError> {
    let source = match pattern.split_once(PATH_PLACEHOLDER) {
        Some((head, tail)) => format!("^{}(.+?){}$", regex::escape(head), regex::escape(tail)),
        None => format!("^{}$", regex::escape(pattern)),
    };
    Regex::new(&source)
        .map_err(|e| AppError::Validation(format!("invalid pattern '{pattern}': {e}")))
}

/// Check that every active rule compiles.
pub fn check_rules(rules: &[MatchRule]) -> Result<(), AppError> {
    for rule in rules {
        CompiledRule::compile(rule)?;
    }
    Ok(())
}

/// Extract containers from a values document with the given rules.
///
/// Inactive and blank rules are ignored. Matches are deduplicated on their
/// concrete path triple.
pub fn parse_images_by_rules(
    doc: &ValuesNode,
    rules: &[MatchRule],
) -> Result<Vec<Container>, AppError> {
    let compiled: Vec<CompiledRule> = rules
        .iter()
        .filter_map(|rule| CompiledRule::compile(rule).transpose())
        .collect::<Result<_, _>>()?;
    if compiled.is_empty() {
        return Ok(Vec::new());
    }

    let leaves = doc.flatten();
    let index: HashMap<&str, &ValuesNode> =
        leaves.iter().map(|(path, node)| (path.as_str(), node)).collect();

    let mut seen = HashSet::new();
    let mut containers = Vec::new();

    for (path, node) in &leaves {
        if node.scalar_text().is_none() {
            continue;
        }
        for rule in &compiled {
            let Some(prefix) = rule.match_anchor(path) else {
                continue;
            };
            let spec = rule.resolve(&prefix);
            let Some(image) = image_uri(&spec, &index) else {
                continue;
            };
            if seen.insert(spec.unique_key()) {
                containers.push(Container {
                    name: extract_image_name(&image),
                    image,
                    image_path: spec,
                });
            }
            break;
        }
    }

    Ok(containers)
}

fn scalar_at(index: &HashMap<&str, &ValuesNode>, path: &str) -> Option<String> {
    index.get(path).and_then(|node| node.scalar_text())
}

/// Assemble `repo/image:tag` from the resolved paths. Every named path must
/// exist as a non-null scalar.
fn image_uri(spec: &ImagePathSpec, index: &HashMap<&str, &ValuesNode>) -> Option<String> {
    let read = |path: &Option<String>| match path {
        Some(p) => scalar_at(index, p).map(Some),
        None => Some(None),
    };
    let repo = read(&spec.repo)?;
    let image = read(&spec.image)?;
    let tag = read(&spec.tag)?;

    let mut uri = repo.unwrap_or_default();
    if let Some(image) = image {
        uri = if uri.is_empty() {
            image
        } else {
            format!("{}/{}", uri.trim_end_matches('/'), image)
        };
    }
    if uri.is_empty() {
        return None;
    }
    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        uri = format!("{uri}:{tag}");
    }
    Some(uri)
}

/// Short container name: last path segment without tag or digest.
pub fn extract_image_name(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    let without_digest = last.split('@').next().unwrap_or(last);
    without_digest
        .split(':')
        .next()
        .unwrap_or(without_digest)
        .to_string()
}
