//! # Template Expansion
//!
//! Expands `{{.Var}}`-style placeholders in mapping `source`/`destination`
//! strings (§4.2 "Template expansion"). Supported variables: `GatewayName`,
//! `CRName`, `Namespace`, `Labels.<key>`, `Ref`, `Commit`, `Vars.<key>`.
//!
//! A missing label or variable is a hard error (`TemplateUnresolved`);
//! substituting in an empty string is rejected too, since it would silently
//! collapse a path segment (e.g. `services/{{.Labels.site}}/projects` with
//! an empty `site` label would become `services//projects`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::error::SyncError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder regex is valid")
});

#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub gateway_name: String,
    pub cr_name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub r#ref: String,
    pub commit: String,
    pub vars: BTreeMap<String, String>,
}

impl TemplateContext {
    fn resolve(&self, path: &str) -> Option<String> {
        match path {
            "GatewayName" => Some(self.gateway_name.clone()),
            "CRName" => Some(self.cr_name.clone()),
            "Namespace" => Some(self.namespace.clone()),
            "Ref" => Some(self.r#ref.clone()),
            "Commit" => Some(self.commit.clone()),
            other => {
                if let Some(key) = other.strip_prefix("Labels.") {
                    self.labels.get(key).cloned()
                } else if let Some(key) = other.strip_prefix("Vars.") {
                    self.vars.get(key).cloned()
                } else {
                    None
                }
            }
        }
    }
}

/// Expand every `{{.Var}}` placeholder in `template`. Returns
/// `TemplateUnresolved` on a missing variable or an empty substitution.
pub fn expand(template: &str, ctx: &TemplateContext) -> Result<String, SyncError> {
    let mut err = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let var_path = &caps[1];
        match ctx.resolve(var_path) {
            Some(value) if value.is_empty() => {
                err.get_or_insert_with(|| {
                    SyncError::TemplateUnresolved(format!(
                        "{var_path} resolved to an empty string in \"{template}\""
                    ))
                });
                String::new()
            }
            Some(value) => value,
            None => {
                err.get_or_insert_with(|| {
                    SyncError::TemplateUnresolved(format!(
                        "{var_path} is not set while expanding \"{template}\""
                    ))
                });
                String::new()
            }
        }
    });

    if let Some(e) = err {
        return Err(e);
    }
    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        let mut labels = BTreeMap::new();
        labels.insert("site".to_string(), "blue".to_string());
        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), "eu".to_string());
        TemplateContext {
            gateway_name: "gw-1".to_string(),
            cr_name: "plant-floor-a".to_string(),
            namespace: "scada".to_string(),
            labels,
            r#ref: "main".to_string(),
            commit: "a".repeat(40),
            vars,
        }
    }

    #[test]
    fn expands_known_variables() {
        let out = expand("services/{{.Labels.site}}/projects/", &ctx()).unwrap();
        assert_eq!(out, "services/blue/projects/");
    }

    #[test]
    fn expands_multiple_placeholders() {
        let out = expand("{{.Namespace}}/{{.CRName}}/{{.Vars.region}}", &ctx()).unwrap();
        assert_eq!(out, "scada/plant-floor-a/eu");
    }

    #[test]
    fn missing_label_is_hard_error() {
        let err = expand("services/{{.Labels.missing}}/projects/", &ctx()).unwrap_err();
        assert!(matches!(err, SyncError::TemplateUnresolved(_)));
    }

    #[test]
    fn empty_substitution_is_rejected() {
        let mut c = ctx();
        c.labels.insert("site".to_string(), String::new());
        let err = expand("services/{{.Labels.site}}/projects/", &c).unwrap_err();
        assert!(matches!(err, SyncError::TemplateUnresolved(_)));
    }

    #[test]
    fn no_placeholders_is_passthrough() {
        assert_eq!(expand("projects/", &ctx()).unwrap(), "projects/");
    }
}
