use serde::Serialize;

use crate::context::{CallSite, Definition};
use crate::execute::TestResult;
use crate::identify::{AmbiguousMatch, InterfaceDescriptor};

/// What the plan says about one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum PlanEntry {
    Fragment(String),
    /// Synthesis degraded; carries the reason.
    Unavailable(String),
    /// A plan was generated but has no section for this interface.
    Missing,
    /// Removed by the change. Always a deprecation note, with whatever the
    /// plan said about the removal.
    Deprecated(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionEntry {
    Completed { result: Box<TestResult> },
    Failed { error: String },
    NotExecuted { reason: String },
}

impl ExecutionEntry {
    pub fn passed(&self) -> Option<bool> {
        match self {
            ExecutionEntry::Completed { result } => Some(result.validation.passed),
            ExecutionEntry::Failed { .. } => Some(false),
            ExecutionEntry::NotExecuted { .. } => None,
        }
    }
}

/// One interface in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub heading: String,
    /// Heading made up here because the plan had no section for it.
    pub auto_heading: bool,
    pub descriptor: InterfaceDescriptor,
    pub definition: Option<Definition>,
    /// Why the definition is missing, or a caveat on the one shown.
    pub definition_note: Option<String>,
    pub call_sites: Vec<CallSite>,
    pub plan: PlanEntry,
    pub execution: ExecutionEntry,
}

/// Run-level facts shown above the sections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunInfo {
    pub files_changed: usize,
    pub additions: usize,
    pub deletions: usize,
    /// Resolver strategy that served this run, when one was used.
    pub strategy: Option<String>,
    pub diagnostics: Vec<AmbiguousMatch>,
    /// Interfaces left out of the prompt to fit its ceiling.
    pub dropped_from_prompt: Vec<String>,
    /// Interfaces whose context did not fit the context budget.
    pub context_rejected: Vec<String>,
    /// Stages that ran degraded, and why.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub interfaces: usize,
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run: RunInfo,
    pub sections: Vec<ReportSection>,
    pub totals: Totals,
}
