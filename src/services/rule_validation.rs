//! Validation of custom image/tar naming rules saved on a project.
//!
//! Rules may embed build variables such as `{{.REPO_BRANCH}}`; those are
//! replaced by a neutral token before the character classes are checked.

use regex::Regex;

use crate::errors::AppError;
use crate::models::product::CustomRule;

const IMAGE_PATTERN: &str = r"^[a-z0-9][a-zA-Z0-9-_:.]+$";
const TAG_PATTERN: &str = r"^[a-z0-9A-Z_][a-zA-Z0-9-_.]+$";
const TAR_PATTERN: &str = r"^[a-z0-9][a-zA-Z0-9-_.]+$";
const VARIABLE_PATTERN: &str = r"\{\{\s*\.[A-Za-z_][A-Za-z0-9_]*\s*\}\}";

const INVALID_CHARS: &str = "contains invalid characters, please check";

/// Kind of artifact a naming rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Image,
    Tar,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Tar => "tar",
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern).map_err(|e| AppError::Internal(format!("Invalid builtin regex: {e}")))
}

/// Replace every `{{.VAR}}` occurrence with a token valid in any position.
pub fn replace_rule_variables(rule: &str) -> Result<String, AppError> {
    Ok(compile(VARIABLE_PATTERN)?.replace_all(rule, "ss").into_owned())
}

/// Validate one naming rule field.
pub fn validate_common_rule(
    rule: &str,
    field: &str,
    resource: ResourceType,
) -> Result<(), AppError> {
    if rule.is_empty() {
        return Err(AppError::Validation(format!("{field} can not be empty")));
    }

    if resource == ResourceType::Image && !rule.contains(':') {
        return Err(AppError::Validation(format!(
            "{field} is invalid, must contain a colon"
        )));
    }

    let rendered = replace_rule_variables(rule)?;
    let invalid = || {
        AppError::Validation(format!("{} {field} {INVALID_CHARS}", resource.as_str()))
    };

    match resource {
        ResourceType::Image => {
            let (name, tag) = rendered.split_once(':').ok_or_else(invalid)?;
            if !compile(IMAGE_PATTERN)?.is_match(name) || !compile(TAG_PATTERN)?.is_match(tag) {
                return Err(invalid());
            }
        }
        ResourceType::Tar => {
            if !compile(TAR_PATTERN)?.is_match(&rendered) {
                return Err(invalid());
            }
        }
    }

    Ok(())
}

/// Validate the image and tar naming rules of a project. Absent rules pass.
pub fn validate_rules(
    image_rule: Option<&CustomRule>,
    tar_rule: Option<&CustomRule>,
) -> Result<(), AppError> {
    let groups = [(image_rule, ResourceType::Image), (tar_rule, ResourceType::Tar)];
    for (rule, resource) in groups {
        let Some(rule) = rule else { continue };
        for (field, value) in rule.fields() {
            validate_common_rule(value, field, resource)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_rule(value: &str) -> CustomRule {
        CustomRule {
            pr_rule: value.to_string(),
            branch_rule: value.to_string(),
            tag_rule: value.to_string(),
            jenkins_rule: value.to_string(),
        }
    }

    #[test]
    fn image_rule_without_colon_is_rejected() {
        let err = validate_common_rule("myrepo-app", "pr_rule", ResourceType::Image).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: pr_rule is invalid, must contain a colon"
        );
    }

    #[test]
    fn image_rule_with_valid_halves_is_accepted() {
        assert!(validate_common_rule("myrepo-app:1.0", "pr_rule", ResourceType::Image).is_ok());
    }

    #[test]
    fn slash_is_outside_the_image_character_class() {
        let err =
            validate_common_rule("myrepo/app:1.0", "tag_rule", ResourceType::Image).unwrap_err();
        assert!(err.to_string().contains("image tag_rule contains invalid characters"));
    }

    #[test]
    fn invalid_tag_half_is_rejected() {
        let err =
            validate_common_rule("app:-bad", "branch_rule", ResourceType::Image).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn empty_rule_names_the_field() {
        let err = validate_common_rule("", "jenkins_rule", ResourceType::Tar).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: jenkins_rule can not be empty");
    }

    #[test]
    fn variables_are_substituted_before_matching() {
        let rule = "{{.IMAGE_NAME}}:{{.TIMESTAMP}}-{{.TASK_ID}}-{{.REPO_BRANCH}}";
        assert!(validate_common_rule(rule, "branch_rule", ResourceType::Image).is_ok());
        assert_eq!(replace_rule_variables("{{.SERVICE}}-{{ .TASK_ID }}").unwrap(), "ss-ss");
    }

    #[test]
    fn tar_rule_rejects_colon() {
        let err = validate_common_rule("build:1", "pr_rule", ResourceType::Tar).unwrap_err();
        assert!(err.to_string().contains("tar pr_rule"));
        assert!(validate_common_rule("build-{{.TASK_ID}}.tar.gz", "pr_rule", ResourceType::Tar).is_ok());
    }

    #[test]
    fn validate_rules_checks_every_field_and_skips_absent_groups() {
        assert!(validate_rules(None, None).is_ok());
        assert!(validate_rules(Some(&image_rule("app:{{.TASK_ID}}")), None).is_ok());

        let mut partial = image_rule("app:v1");
        partial.jenkins_rule.clear();
        let err = validate_rules(Some(&partial), None).unwrap_err();
        assert!(err.to_string().contains("jenkins_rule can not be empty"));
    }
}
