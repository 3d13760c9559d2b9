use serde::Serialize;
use std::fmt;

use crate::diff::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InterfaceKind {
    Endpoint,
    Component,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Endpoint => write!(f, "endpoint"),
            InterfaceKind::Component => write!(f, "component"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Case-insensitive parse of a method token.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Whether requests with this method conventionally carry a body.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(http_method?, path_or_name)`: what an interface is called from outside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identity {
    pub method: Option<HttpMethod>,
    pub name: String,
}

impl Identity {
    pub fn endpoint(method: Option<HttpMethod>, path: impl Into<String>) -> Self {
        Self {
            method,
            name: path.into(),
        }
    }

    pub fn component(name: impl Into<String>) -> Self {
        Self {
            method: None,
            name: name.into(),
        }
    }

    /// Text callers use to reach the interface: the full route path or the
    /// component name.
    pub fn search_text(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            Some(method) => write!(f, "{} {}", method, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeTag {
    Added,
    Modified,
    /// Present only on the removed side of the diff
    Removed,
}

impl fmt::Display for ChangeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeTag::Added => write!(f, "added"),
            ChangeTag::Modified => write!(f, "modified"),
            ChangeTag::Removed => write!(f, "removed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Framework or idiom a recognizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Dialect {
    Express,
    NestJs,
    FastApi,
    Flask,
    Django,
    Actix,
    Axum,
    Spring,
    JaxRs,
    Gin,
    React,
    Angular,
    Generic,
}

impl Dialect {
    pub fn family(&self) -> Family {
        match self {
            Dialect::Express | Dialect::NestJs | Dialect::React | Dialect::Angular => {
                Family::JavaScript
            }
            Dialect::FastApi | Dialect::Flask | Dialect::Django => Family::Python,
            Dialect::Actix | Dialect::Axum => Family::Rust,
            Dialect::Spring | Dialect::JaxRs => Family::Java,
            Dialect::Gin => Family::Go,
            Dialect::Generic => Family::Any,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Express => "express",
            Dialect::NestJs => "nestjs",
            Dialect::FastApi => "fastapi",
            Dialect::Flask => "flask",
            Dialect::Django => "django",
            Dialect::Actix => "actix",
            Dialect::Axum => "axum",
            Dialect::Spring => "spring",
            Dialect::JaxRs => "jax-rs",
            Dialect::Gin => "gin",
            Dialect::React => "react",
            Dialect::Angular => "angular",
            Dialect::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Group of source languages a dialect can appear in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    JavaScript,
    Python,
    Rust,
    Java,
    Go,
    Any,
}

impl Family {
    pub fn covers(&self, language: Language) -> bool {
        match self {
            Family::JavaScript => matches!(language, Language::TypeScript | Language::JavaScript),
            Family::Python => language == Language::Python,
            Family::Rust => language == Language::Rust,
            Family::Java => language == Language::Java,
            Family::Go => language == Language::Go,
            Family::Any => true,
        }
    }
}

/// Identity record for one interface touched by the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDescriptor {
    pub kind: InterfaceKind,
    pub identity: Identity,
    pub declaring_file: String,
    /// New-side line, or old-side line for removed interfaces
    pub declaring_line: usize,
    pub dialect: Dialect,
    pub change: ChangeTag,
    pub confidence: Confidence,
    /// Route or name as spelled at the declaration, before normalization
    /// and router prefixes.
    pub search_literal: String,
}

impl InterfaceDescriptor {
    pub fn key(&self) -> DescriptorKey {
        DescriptorKey {
            kind: self.kind,
            identity: self.identity.clone(),
            declaring_file: self.declaring_file.clone(),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.change == ChangeTag::Removed
    }
}

/// Dedup key: `(kind, identity, declaring_file)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DescriptorKey {
    pub kind: InterfaceKind,
    pub identity: Identity,
    pub declaring_file: String,
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity, self.declaring_file)
    }
}

/// A line that more than one recognizer claimed. The first registered
/// recognizer's reading is kept; the runner-up is recorded here only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub file: String,
    pub line: usize,
    pub kept: Dialect,
    pub runner_up: Dialect,
    pub runner_up_kind: InterfaceKind,
    pub runner_up_identity: Identity,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Identification {
    pub descriptors: Vec<InterfaceDescriptor>,
    pub diagnostics: Vec<AmbiguousMatch>,
}
