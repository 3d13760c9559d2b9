use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::context::ParamLocation;
use crate::identify::{HttpMethod, InterfaceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Required by the route but absent from the definition; synthesized from the name.
    Inferred,
    /// Declared with an unknown type; a placeholder string was used.
    LowConfidence,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagKind::Inferred => write!(f, "inferred"),
            FlagKind::LowConfidence => write!(f, "low-confidence"),
        }
    }
}

/// Marks a generated value that is a guess rather than typed data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ValueFlag {
    pub name: String,
    pub location: Option<ParamLocation>,
    pub kind: FlagKind,
}

/// A request built for one interface. Generated per run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRequest {
    pub descriptor: InterfaceDescriptor,
    pub method: HttpMethod,
    /// Route template as declared, placeholders included
    pub path: String,
    pub path_params: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, serde_json::Value>,
    pub body: Option<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub flags: Vec<ValueFlag>,
    /// Request against a removed endpoint: success means it is gone.
    pub expect_gone: bool,
}

impl TestRequest {
    pub fn is_inferred(&self) -> bool {
        self.flags.iter().any(|f| f.kind == FlagKind::Inferred)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckOutcome {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub passed: bool,
    /// Extension-point checks only; empty when none are registered.
    pub checks: Vec<CheckOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub request: TestRequest,
    pub url: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub body_snapshot: String,
    pub validation: Validation,
}
