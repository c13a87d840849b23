//! OpenAPI operation resolution and request building.
//!
//! The runtime consumes a deliberately thin slice of OpenAPI 3.0: the
//! `paths.<path>.<verb>.operationId` entries and `servers[0].url`. Every
//! other field in the bundle is ignored. Bindings reference operations by
//! identifier; the resolver maps them to `(METHOD, path)` pairs and builds
//! transport-independent request specifications.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::manifest::Manifest;

/// HTTP verbs recognized under a path item.
const HTTP_VERBS: [&str; 7] = ["get", "put", "post", "delete", "options", "head", "patch"];

/// Errors from bundle parsing and request building.
#[derive(Debug, Error)]
pub enum OpenApiError {
    /// The bundle is not JSON, has no operations, or a manifest binding
    /// references an operation it does not define.
    #[error("invalid OpenAPI document: {0}")]
    InvalidDocument(String),

    /// The request body could not be serialized.
    #[error("invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// The joined request URL is not valid.
    #[error("request build failed: {0}")]
    RequestBuildFailed(String),
}

/// One resolvable HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Uppercased HTTP verb.
    pub method: String,
    /// OpenAPI path, as written in the bundle.
    pub path: String,
}

/// A built request, independent of the transport that will send it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Uppercased HTTP method.
    pub method: String,
    /// Absolute request URL.
    pub url: Url,
    /// Headers in application order.
    pub headers: BTreeMap<String, String>,
    /// JSON-encoded body, if any.
    pub body: Option<Vec<u8>>,
}

/// Maps operation identifiers to endpoints.
pub struct OpenApiResolver {
    operations: HashMap<String, Operation>,
    server_url: Option<Url>,
}

impl OpenApiResolver {
    /// Parses a bundle, recording every `operationId` under `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiError::InvalidDocument`] for unparsable JSON or a
    /// bundle defining no operations.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OpenApiError> {
        let document: Value = serde_json::from_slice(bytes)
            .map_err(|err| OpenApiError::InvalidDocument(err.to_string()))?;

        let mut operations = HashMap::new();
        if let Some(paths) = document.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                let Some(item) = item.as_object() else {
                    continue;
                };
                for verb in HTTP_VERBS {
                    let Some(operation_id) = item
                        .get(verb)
                        .and_then(|op| op.get("operationId"))
                        .and_then(Value::as_str)
                    else {
                        continue;
                    };
                    operations.insert(
                        operation_id.to_string(),
                        Operation {
                            method: verb.to_uppercase(),
                            path: path.clone(),
                        },
                    );
                }
            }
        }

        if operations.is_empty() {
            return Err(OpenApiError::InvalidDocument(
                "bundle defines no operations".to_string(),
            ));
        }

        let server_url = document
            .get("servers")
            .and_then(Value::as_array)
            .and_then(|servers| servers.first())
            .and_then(|server| server.get("url"))
            .and_then(Value::as_str)
            .and_then(|raw| Url::parse(raw).ok());

        Ok(Self {
            operations,
            server_url,
        })
    }

    /// Returns the bundle's first server URL, if it declared one.
    #[must_use]
    pub const fn server_url(&self) -> Option<&Url> {
        self.server_url.as_ref()
    }

    /// Looks up an operation by identifier.
    #[must_use]
    pub fn operation(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.get(operation_id)
    }

    /// Checks every binding in every manifest step against the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiError::InvalidDocument`] naming the first unknown
    /// operation identifier.
    pub fn validate_operation_ids(&self, manifest: &Manifest) -> Result<(), OpenApiError> {
        for (step_id, step) in &manifest.steps {
            for binding in &step.bindings {
                if !self.operations.contains_key(&binding.call.operation_id) {
                    return Err(OpenApiError::InvalidDocument(format!(
                        "step {step_id} references unknown operationId {}",
                        binding.call.operation_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds a request for an operation against a base URL.
    ///
    /// The URL joins the base path and operation path, each trimmed of
    /// surrounding slashes, with exactly one separator. `Content-Type` and
    /// `Accept` default to JSON; explicit headers win.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiError::InvalidBody`] when the body fails to
    /// serialize and [`OpenApiError::RequestBuildFailed`] when the joined
    /// URL is invalid.
    pub fn build_request(
        base_url: &Url,
        operation: &Operation,
        body: Option<&Value>,
        headers: &BTreeMap<String, String>,
    ) -> Result<RequestSpec, OpenApiError> {
        let base_path = base_url.path().trim_matches('/');
        let operation_path = operation.path.trim_matches('/');
        let joined = if base_path.is_empty() {
            format!("/{operation_path}")
        } else {
            format!("/{base_path}/{operation_path}")
        };

        let mut url = base_url.clone();
        url.set_path(&joined);
        url.set_query(None);

        let encoded_body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(OpenApiError::InvalidBody)?;

        let mut merged = BTreeMap::new();
        if encoded_body.is_some() {
            merged.insert("Content-Type".to_string(), "application/json".to_string());
        }
        merged.insert("Accept".to_string(), "application/json".to_string());
        for (name, value) in headers {
            merged.insert(name.clone(), value.clone());
        }

        Ok(RequestSpec {
            method: operation.method.to_uppercase(),
            url,
            headers: merged,
            body: encoded_body,
        })
    }
}
