//! Workflow DSL document: conversion from the proto spec, YAML emission,
//! and structural validation.
//!
//! The engine consumes workflow definitions as a YAML document. The
//! control plane converts the proto `WorkflowSpec` into this document
//! before a Workflow resource is accepted, and the validation activity
//! re-runs the structural checks inside the engine so a worker that is
//! not polling is caught before anything is persisted as runnable.

use serde::{Deserialize, Serialize};
use url::Url;

use lodestar_proto::v1::{WorkflowSpec, workflow_task};

/// DSL document version this control plane emits.
pub const DSL_VERSION: &str = "1.0.0";

/// Accepted HTTP methods for call tasks.
const HTTP_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Default HTTP task timeout when the spec leaves it at zero.
const DEFAULT_HTTP_TIMEOUT_SECS: u32 = 30;

/// Longest HTTP task timeout the DSL accepts, in seconds.
const MAX_HTTP_TIMEOUT_SECS: u32 = 300;

/// A structural validation failure with the offending document path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{path}: {message}")]
pub struct DslError {
    /// Document path of the failing element, e.g. `tasks[1].set`.
    pub path: String,
    /// What is wrong there.
    pub message: String,
}

impl DslError {
    fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Top-level workflow document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDoc {
    /// Document header.
    pub document: DocumentMeta,
    /// Ordered task chain.
    pub tasks: Vec<DslTask>,
}

/// Document header block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// DSL version this document conforms to.
    pub dsl: String,
    /// Workflow namespace.
    pub namespace: String,
    /// Workflow name (slug).
    pub name: String,
    /// Workflow version.
    pub version: String,
}

/// One task in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DslTask {
    /// HTTP call task.
    Http {
        /// Task name, unique within the document.
        name: String,
        /// HTTP method.
        method: String,
        /// Request URL.
        url: String,
        /// Request headers.
        #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
        headers: std::collections::BTreeMap<String, String>,
        /// Request body, when the method carries one.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        body: String,
        /// Per-call timeout in seconds.
        timeout_seconds: u32,
    },
    /// Variable-setting task; values may reference prior task output as
    /// `${task.field}`.
    Set {
        /// Task name, unique within the document.
        name: String,
        /// Values to set.
        values: std::collections::BTreeMap<String, String>,
    },
}

impl DslTask {
    /// The task's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Http { name, .. } | Self::Set { name, .. } => name,
        }
    }
}

/// Convert a proto workflow spec into a DSL document.
///
/// `name` is the workflow resource's slug.
///
/// # Errors
///
/// Returns a [`DslError`] for tasks with no kind set.
pub fn from_spec(name: &str, spec: &WorkflowSpec) -> Result<WorkflowDoc, DslError> {
    let mut tasks = Vec::with_capacity(spec.tasks.len());
    for (i, task) in spec.tasks.iter().enumerate() {
        let dsl_task = match &task.kind {
            Some(workflow_task::Kind::Http(http)) => DslTask::Http {
                name: task.name.clone(),
                method: if http.method.is_empty() {
                    "GET".to_owned()
                } else {
                    http.method.to_uppercase()
                },
                url: http.url.clone(),
                headers: http.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                body: http.body.clone(),
                timeout_seconds: if http.timeout_seconds == 0 {
                    DEFAULT_HTTP_TIMEOUT_SECS
                } else {
                    http.timeout_seconds
                },
            },
            Some(workflow_task::Kind::Set(set)) => DslTask::Set {
                name: task.name.clone(),
                values: set.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            },
            None => {
                return Err(DslError::at(
                    format!("tasks[{i}]"),
                    "task must declare a kind (http or set)",
                ));
            }
        };
        tasks.push(dsl_task);
    }

    Ok(WorkflowDoc {
        document: DocumentMeta {
            dsl: DSL_VERSION.to_owned(),
            namespace: spec.namespace.clone(),
            name: name.to_owned(),
            version: spec.version.clone(),
        },
        tasks,
    })
}

/// Emit the document as YAML.
///
/// # Errors
///
/// Returns a [`DslError`] if serialization fails.
pub fn to_yaml(doc: &WorkflowDoc) -> Result<String, DslError> {
    serde_yaml::to_string(doc).map_err(|e| DslError::at("document", e.to_string()))
}

/// Structurally validate a document.
///
/// # Errors
///
/// Returns the first [`DslError`] found, with the offending path.
pub fn validate(doc: &WorkflowDoc) -> Result<(), DslError> {
    if doc.document.dsl != DSL_VERSION {
        return Err(DslError::at(
            "document.dsl",
            format!("unsupported DSL version '{}'", doc.document.dsl),
        ));
    }
    if doc.document.namespace.is_empty() {
        return Err(DslError::at("document.namespace", "must not be empty"));
    }
    if doc.document.name.is_empty() {
        return Err(DslError::at("document.name", "must not be empty"));
    }
    validate_version(&doc.document.version)?;

    if doc.tasks.is_empty() {
        return Err(DslError::at("tasks", "workflow must declare at least one task"));
    }

    let mut earlier: Vec<&str> = Vec::with_capacity(doc.tasks.len());
    for (i, task) in doc.tasks.iter().enumerate() {
        let path = format!("tasks[{i}]");
        if task.name().is_empty() {
            return Err(DslError::at(format!("{path}.name"), "must not be empty"));
        }
        if earlier.contains(&task.name()) {
            return Err(DslError::at(
                format!("{path}.name"),
                format!("duplicate task name '{}'", task.name()),
            ));
        }

        match task {
            DslTask::Http {
                method,
                url,
                timeout_seconds,
                ..
            } => {
                if !HTTP_METHODS.contains(&method.as_str()) {
                    return Err(DslError::at(
                        format!("{path}.method"),
                        format!("unsupported HTTP method '{method}'"),
                    ));
                }
                if Url::parse(url).is_err() {
                    return Err(DslError::at(
                        format!("{path}.url"),
                        format!("'{url}' is not a valid URL"),
                    ));
                }
                if *timeout_seconds == 0 || *timeout_seconds > MAX_HTTP_TIMEOUT_SECS {
                    return Err(DslError::at(
                        format!("{path}.timeout_seconds"),
                        format!("must be between 1 and {MAX_HTTP_TIMEOUT_SECS}"),
                    ));
                }
            }
            DslTask::Set { values, .. } => {
                if values.is_empty() {
                    return Err(DslError::at(
                        format!("{path}.values"),
                        "must set at least one value",
                    ));
                }
                for (key, value) in values {
                    for reference in extract_references(value) {
                        let target = reference.split('.').next().unwrap_or(&reference);
                        if !earlier.contains(&target) {
                            return Err(DslError::at(
                                format!("{path}.values.{key}"),
                                format!("reference '${{{reference}}}' does not match any earlier task"),
                            ));
                        }
                    }
                }
            }
        }
        earlier.push(task.name());
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<(), DslError> {
    let parts: Vec<&str> = version.split('.').collect();
    let ok = parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if ok {
        Ok(())
    } else {
        Err(DslError::at(
            "document.version",
            format!("'{version}' is not a MAJOR.MINOR.PATCH version"),
        ))
    }
}

/// Outcome of the validation activity, carried back through the engine as
/// the validation workflow's result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the document passed structural validation.
    pub valid: bool,
    /// The failure, when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DslError>,
}

impl ValidationReport {
    /// A passing report.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    /// A failing report.
    #[must_use]
    pub fn invalid(error: DslError) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}

/// Pull `${...}` references out of a value string.
#[must_use]
pub fn extract_references(value: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let after = &rest[start.saturating_add(2)..];
        match after.find('}') {
            Some(end) => {
                refs.push(after[..end].to_owned());
                rest = &after[end.saturating_add(1)..];
            }
            None => break,
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_proto::v1::{HttpTask, SetTask, WorkflowTask};

    fn sample_spec() -> WorkflowSpec {
        WorkflowSpec {
            namespace: "data-processing".into(),
            version: "1.0.0".into(),
            tasks: vec![
                WorkflowTask {
                    name: "fetchData".into(),
                    kind: Some(workflow_task::Kind::Http(HttpTask {
                        method: "GET".into(),
                        url: "https://jsonplaceholder.typicode.com/posts/1".into(),
                        timeout_seconds: 10,
                        ..HttpTask::default()
                    })),
                },
                WorkflowTask {
                    name: "processData".into(),
                    kind: Some(workflow_task::Kind::Set(SetTask {
                        values: [("title".to_owned(), "${fetchData.title}".to_owned())]
                            .into_iter()
                            .collect(),
                    })),
                },
            ],
            ..WorkflowSpec::default()
        }
    }

    #[test]
    fn test_from_spec_and_validate() {
        let doc = from_spec("basic-data-fetch", &sample_spec()).unwrap();
        assert_eq!(doc.document.name, "basic-data-fetch");
        assert_eq!(doc.tasks.len(), 2);
        validate(&doc).unwrap();
    }

    #[test]
    fn test_yaml_round_trip() {
        let doc = from_spec("basic-data-fetch", &sample_spec()).unwrap();
        let yaml = to_yaml(&doc).unwrap();
        assert!(yaml.contains("fetchData"));
        let parsed: WorkflowDoc = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let mut doc = from_spec("wf", &sample_spec()).unwrap();
        doc.tasks.swap(0, 1);
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.path, "tasks[0].values.title");
    }

    #[test]
    fn test_bad_method_rejected() {
        let mut doc = from_spec("wf", &sample_spec()).unwrap();
        if let DslTask::Http { method, .. } = &mut doc.tasks[0] {
            *method = "FETCH".into();
        }
        let err = validate(&doc).unwrap_err();
        assert_eq!(err.path, "tasks[0].method");
    }

    #[test]
    fn test_version_format_enforced() {
        let mut doc = from_spec("wf", &sample_spec()).unwrap();
        doc.document.version = "one".into();
        assert_eq!(validate(&doc).unwrap_err().path, "document.version");
    }

    #[test]
    fn test_default_timeout_applied() {
        let mut spec = sample_spec();
        if let Some(workflow_task::Kind::Http(http)) = &mut spec.tasks[0].kind {
            http.timeout_seconds = 0;
        }
        let doc = from_spec("wf", &spec).unwrap();
        if let DslTask::Http { timeout_seconds, .. } = &doc.tasks[0] {
            assert_eq!(*timeout_seconds, DEFAULT_HTTP_TIMEOUT_SECS);
        }
    }

    #[test]
    fn test_extract_references() {
        assert_eq!(
            extract_references("${fetchData.title} and ${other.x}"),
            vec!["fetchData.title".to_owned(), "other.x".to_owned()]
        );
        assert!(extract_references("plain text").is_empty());
        assert!(extract_references("${unclosed").is_empty());
    }
}
