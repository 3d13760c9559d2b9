use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::context::params::guess_by_name;
use crate::context::{Definition, ParamLocation, ParameterSpec, ValueType};
use crate::execute::path::placeholders;
use crate::execute::{FlagKind, TestRequest, ValueFlag};
use crate::identify::{HttpMethod, InterfaceKind};

/// Values merged into every generated request. Request-specific values win.
#[derive(Debug, Clone, Default)]
pub struct SharedDefaults {
    pub headers: BTreeMap<String, String>,
    pub auth_token: Option<String>,
    /// Also build requests for removed endpoints, expecting them to be gone.
    pub probe_removed: bool,
}

/// Builds request payloads from declared parameter shapes. The same
/// definition always yields the same request.
#[derive(Debug, Clone, Default)]
pub struct TestDataGenerator {
    defaults: SharedDefaults,
}

impl TestDataGenerator {
    pub fn new(defaults: SharedDefaults) -> Self {
        Self { defaults }
    }

    /// `None` for components and, unless probing is enabled, removed endpoints.
    pub fn generate(&self, definition: &Definition) -> Option<TestRequest> {
        let descriptor = &definition.descriptor;
        if descriptor.kind != InterfaceKind::Endpoint {
            return None;
        }
        if descriptor.is_removed() && !self.defaults.probe_removed {
            debug!(interface = %descriptor.identity, "removed endpoint; no request generated");
            return None;
        }

        let mut flags = BTreeSet::new();
        let method = match descriptor.identity.method {
            Some(method) => method,
            None => {
                flags.insert(flag("method", None, FlagKind::Inferred));
                HttpMethod::Get
            }
        };

        let mut path_params = BTreeMap::new();
        let mut query_params = BTreeMap::new();
        let mut body = Map::new();
        let mut headers = BTreeMap::new();
        for spec in &definition.parameters {
            let Some(value) = value_for(spec, &mut flags) else {
                continue;
            };
            match spec.location {
                ParamLocation::Path => {
                    path_params.insert(spec.name.clone(), scalar_text(&value));
                }
                ParamLocation::Query => {
                    query_params.insert(spec.name.clone(), value);
                }
                ParamLocation::Body => {
                    body.insert(spec.name.clone(), value);
                }
                ParamLocation::Header => {
                    headers.insert(spec.name.clone(), scalar_text(&value));
                }
            }
        }

        // Route placeholders the definition did not declare are still required.
        for name in placeholders(&descriptor.identity.name) {
            if path_params.contains_key(&name) {
                continue;
            }
            let value = by_name(&name);
            path_params.insert(name.clone(), scalar_text(&value));
            flags.insert(flag(&name, Some(ParamLocation::Path), FlagKind::Inferred));
        }

        let body = if !body.is_empty() || method.has_body() {
            Some(Value::Object(body))
        } else {
            None
        };

        Some(TestRequest {
            descriptor: descriptor.clone(),
            method,
            path: descriptor.identity.name.clone(),
            path_params,
            query_params,
            body,
            headers: self.merge_headers(headers),
            flags: flags.into_iter().collect(),
            expect_gone: descriptor.is_removed(),
        })
    }

    fn merge_headers(&self, specific: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = self.defaults.headers.clone();
        if let Some(token) = &self.defaults.auth_token {
            merged.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        for (name, value) in specific {
            // Header names compare case-insensitively.
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
            merged.insert(name, value);
        }
        merged
    }
}

fn flag(name: &str, location: Option<ParamLocation>, kind: FlagKind) -> ValueFlag {
    ValueFlag {
        name: name.to_string(),
        location,
        kind,
    }
}

fn placeholder_text(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("test_{}", cleaned)
}

fn by_name(name: &str) -> Value {
    match guess_by_name(name) {
        ValueType::Number => json!(1),
        ValueType::Boolean => json!(true),
        _ => json!(placeholder_text(name)),
    }
}

/// Generated value for one parameter; `None` means the parameter is left out.
fn value_for(spec: &ParameterSpec, flags: &mut BTreeSet<ValueFlag>) -> Option<Value> {
    let value = match spec.value_type {
        ValueType::String => json!(placeholder_text(&spec.name)),
        ValueType::Number => json!(1),
        ValueType::Boolean => json!(true),
        ValueType::Object => {
            let fields: Map<String, Value> = spec
                .children
                .iter()
                .filter_map(|child| Some((child.name.clone(), value_for(child, flags)?)))
                .collect();
            Value::Object(fields)
        }
        ValueType::Array => {
            let items: Vec<Value> = spec
                .children
                .first()
                .filter(|item| item.value_type != ValueType::Unknown)
                .and_then(|item| value_for(item, flags))
                .into_iter()
                .collect();
            Value::Array(items)
        }
        ValueType::Unknown if spec.required => {
            flags.insert(flag(&spec.name, Some(spec.location), FlagKind::LowConfidence));
            json!(placeholder_text(&spec.name))
        }
        ValueType::Unknown => return None,
    };
    Some(value)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
