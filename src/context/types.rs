use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

use crate::budget::CharBudget;
use crate::identify::{DescriptorKey, InterfaceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ParamLocation {
    Path,
    Query,
    Body,
    Header,
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamLocation::Path => write!(f, "path"),
            ParamLocation::Query => write!(f, "query"),
            ParamLocation::Body => write!(f, "body"),
            ParamLocation::Header => write!(f, "header"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Unknown,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
            ValueType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One declared input of an interface. `children` describes object fields,
/// or the single item shape of an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub value_type: ValueType,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParameterSpec>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, location: ParamLocation, value_type: ValueType, required: bool) -> Self {
        Self {
            name: name.into(),
            location,
            value_type,
            required,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ParameterSpec>) -> Self {
        self.children = children;
        self
    }
}

/// Rough shape of a response type, when the handler names one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSketch {
    pub name: String,
    pub is_list: bool,
    pub fields: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MatchQuality {
    Weak,
    Partial,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Definition {
    pub descriptor: InterfaceDescriptor,
    pub parameters: Vec<ParameterSpec>,
    pub response_shape: Option<TypeSketch>,
    pub source_excerpt: String,
    /// `(file, line)` the excerpt is centered on
    pub location: Option<(String, usize)>,
    pub match_quality: Option<MatchQuality>,
    pub failure: Option<String>,
}

impl Definition {
    /// A definition that could not be assembled, with the reason kept.
    pub fn empty(descriptor: InterfaceDescriptor, reason: impl Into<String>) -> Self {
        Self {
            descriptor,
            parameters: Vec::new(),
            response_shape: None,
            source_excerpt: String::new(),
            location: None,
            match_quality: None,
            failure: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub file: String,
    pub line: Option<usize>,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    pub definition: Definition,
    pub call_sites: Vec<CallSite>,
}

impl ContextEntry {
    /// Characters this entry contributes to the context budget: everything
    /// the prompt renders from it, nested fields and response shape included.
    pub fn char_cost(&self) -> usize {
        let definition = &self.definition;
        let params: usize = definition.parameters.iter().map(param_cost).sum();
        let response = definition.response_shape.as_ref().map_or(0, |shape| {
            shape.name.chars().count() + 14 + shape.fields.iter().map(param_cost).sum::<usize>()
        });
        let sites: usize = self
            .call_sites
            .iter()
            .map(|c| c.file.chars().count() + c.excerpt.chars().count() + 8)
            .sum();
        definition.source_excerpt.chars().count()
            + definition.failure.as_ref().map_or(0, |f| f.chars().count())
            + params
            + response
            + sites
    }
}

/// `  - name (body, string, required)` plus any nested fields.
fn param_cost(spec: &ParameterSpec) -> usize {
    let line = format!(
        "  - {} ({}, {}{})\n",
        spec.name,
        spec.location,
        spec.value_type,
        if spec.required { ", required" } else { "" }
    );
    line.chars().count() + spec.children.iter().map(param_cost).sum::<usize>()
}

/// Per-descriptor definitions and call sites under a global character
/// budget. Entries that do not fit are rejected whole and listed; they stay
/// reachable through [`AdditionalContext::assembled`] for consumers that are
/// not bound by the budget, such as request generation.
#[derive(Debug, Clone)]
pub struct AdditionalContext {
    entries: IndexMap<DescriptorKey, ContextEntry>,
    over_budget: IndexMap<DescriptorKey, ContextEntry>,
    rejected: Vec<DescriptorKey>,
    budget: CharBudget,
}

impl AdditionalContext {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            over_budget: IndexMap::new(),
            rejected: Vec::new(),
            budget: CharBudget::new(limit),
        }
    }

    pub fn try_insert(&mut self, entry: ContextEntry) -> bool {
        let key = entry.definition.descriptor.key();
        if self.entries.contains_key(&key) || self.over_budget.contains_key(&key) {
            self.rejected.push(key);
            return false;
        }
        if !self.budget.try_reserve(entry.char_cost()) {
            self.rejected.push(key.clone());
            self.over_budget.insert(key, entry);
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    /// Entry admitted under the budget.
    pub fn get(&self, key: &DescriptorKey) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// Entry as assembled, whether or not it fit the budget.
    pub fn assembled(&self, key: &DescriptorKey) -> Option<&ContextEntry> {
        self.entries.get(key).or_else(|| self.over_budget.get(key))
    }

    pub fn is_over_budget(&self, key: &DescriptorKey) -> bool {
        self.over_budget.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn rejected(&self) -> &[DescriptorKey] {
        &self.rejected
    }

    pub fn used_chars(&self) -> usize {
        self.budget.used()
    }

    pub fn remaining_chars(&self) -> usize {
        self.budget.remaining()
    }

    pub fn limit(&self) -> usize {
        self.budget.limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::{ChangeTag, Dialect, HttpMethod, InterfaceKind};
    use crate::identify::types::{Confidence, Identity};

    fn descriptor(path: &str) -> InterfaceDescriptor {
        InterfaceDescriptor {
            kind: InterfaceKind::Endpoint,
            identity: Identity::endpoint(Some(HttpMethod::Get), path),
            declaring_file: "app.py".to_string(),
            declaring_line: 1,
            dialect: Dialect::FastApi,
            change: ChangeTag::Added,
            confidence: Confidence::High,
            search_literal: path.to_string(),
        }
    }

    fn entry(path: &str, excerpt_len: usize) -> ContextEntry {
        let mut definition = Definition::empty(descriptor(path), "");
        definition.failure = None;
        definition.source_excerpt = "x".repeat(excerpt_len);
        ContextEntry {
            definition,
            call_sites: Vec::new(),
        }
    }

    #[test]
    fn test_budget_law() {
        let mut context = AdditionalContext::new(100);
        assert!(context.try_insert(entry("/a", 60)));
        assert!(!context.try_insert(entry("/b", 41)));
        assert!(context.try_insert(entry("/c", 40)));
        assert!(context.used_chars() <= context.limit());
        assert_eq!(context.len(), 2);
        assert_eq!(context.rejected().len(), 1);
        assert!(context.get(&descriptor("/b").key()).is_none());
        assert!(context.is_over_budget(&descriptor("/b").key()));
        assert_eq!(
            context.assembled(&descriptor("/b").key()).unwrap().definition.source_excerpt.len(),
            41
        );
        assert_eq!(
            context.get(&descriptor("/a").key()).unwrap().definition.source_excerpt.len(),
            60
        );
    }

    #[test]
    fn test_entry_cost_counts_call_sites() {
        let mut e = entry("/a", 10);
        e.call_sites.push(CallSite {
            file: "web.ts".to_string(),
            line: Some(3),
            excerpt: "fetch('/a')".to_string(),
        });
        assert_eq!(e.char_cost(), 10 + 6 + 11 + 8);
    }

    #[test]
    fn test_entry_cost_counts_nested_fields_and_response() {
        let mut e = entry("/a", 0);
        e.definition.parameters = vec![ParameterSpec::new("user", ParamLocation::Body, ValueType::Object, true)
            .with_children(vec![ParameterSpec::new("name", ParamLocation::Body, ValueType::String, true)])];
        let flat = "  - user (body, object, required)\n".len() + "  - name (body, string, required)\n".len();
        assert_eq!(e.char_cost(), flat);

        e.definition.response_shape = Some(TypeSketch {
            name: "User".to_string(),
            is_list: false,
            fields: vec![ParameterSpec::new("id", ParamLocation::Body, ValueType::Number, true)],
        });
        assert_eq!(e.char_cost(), flat + 4 + 14 + "  - id (body, number, required)\n".len());
    }

    #[test]
    fn test_duplicate_entry_is_not_kept_as_over_budget() {
        let mut context = AdditionalContext::new(100);
        assert!(context.try_insert(entry("/a", 10)));
        assert!(!context.try_insert(entry("/a", 10)));
        assert!(!context.is_over_budget(&descriptor("/a").key()));
        assert_eq!(context.used_chars(), 10);
    }

    #[test]
    fn test_empty_definition_keeps_reason() {
        let d = Definition::empty(descriptor("/a"), "not found by any strategy");
        assert!(d.source_excerpt.is_empty() && d.parameters.is_empty());
        assert_eq!(d.failure.as_deref(), Some("not found by any strategy"));
    }
}
