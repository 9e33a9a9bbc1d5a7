//! Declarative YAML scenario specification

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    pub steps: Vec<ScenarioStep>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// GET a page
    AmOnPage { url: String },

    /// Send an arbitrary request
    SendRequest {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },

    /// Send a header with every following request
    HaveHttpHeader { name: String, value: String },

    /// Put a cookie in the jar
    SetCookie { name: String, value: String },

    /// Follow the redirect held by the current response
    FollowRedirect,

    SeeResponseCodeIs { code: u16 },

    /// Response body contains `text`
    See { text: String },

    DontSee { text: String },

    /// Header is present, optionally with an exact value
    SeeHeader {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },

    /// Cookie is in the jar, optionally with an exact value
    SeeCookie {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },

    DontSeeCookie { name: String },

    SeeCurrentUrlEquals { url: String },

    /// Log a message (for debugging)
    Log { message: String },
}

impl ScenarioSpec {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| HarnessError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, ordered by file path
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|path| Self::from_file(path)).collect()
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::SpecParse("scenario name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::SpecParse(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: ping
description: Ping the API
tags:
  - api
  - smoke
steps:
  - action: have_http_header
    name: accept
    value: application/json
  - action: am_on_page
    url: /api/ping
  - action: see_response_code_is
    code: 200
  - action: see
    text: ping
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "ping");
        assert_eq!(spec.steps.len(), 4);
        assert!(matches!(spec.steps[1], ScenarioStep::AmOnPage { ref url } if url == "/api/ping"));
    }

    #[test]
    fn test_send_request_defaults_to_get() {
        let yaml = r#"
name: rest
steps:
  - action: send_request
    url: /rest
  - action: follow_redirect
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        match &spec.steps[0] {
            ScenarioStep::SendRequest { method, headers, body, .. } => {
                assert_eq!(method, "GET");
                assert!(headers.is_empty());
                assert!(body.is_none());
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(matches!(spec.steps[1], ScenarioStep::FollowRedirect));
    }

    #[test]
    fn test_rejects_empty_scenario() {
        let err = ScenarioSpec::from_yaml("name: empty\nsteps: []\n").unwrap_err();
        assert!(matches!(err, HarnessError::SpecParse(_)));
    }

    #[test]
    fn test_filter_by_tag() {
        let specs = vec![
            ScenarioSpec::from_yaml("name: a\ntags: [api]\nsteps:\n  - action: am_on_page\n    url: /\n").unwrap(),
            ScenarioSpec::from_yaml("name: b\nsteps:\n  - action: am_on_page\n    url: /\n").unwrap(),
        ];
        let filtered = ScenarioSpec::filter_by_tag(&specs, "api");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "a");
    }
}
