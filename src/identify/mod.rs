pub mod prefix;
pub mod recognizers;
pub mod types;

pub use recognizers::{Recognition, Recognizer};
pub use types::{
    AmbiguousMatch, ChangeTag, DescriptorKey, Dialect, HttpMethod, Identification, InterfaceDescriptor,
    InterfaceKind,
};

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::diff::{DiffLine, DiffSet, LineKind};
use prefix::{apply_prefix, PrefixRules};

/// Lines after a match a recognizer may inspect (decorator + signature pairs).
const TRAILING_WINDOW: usize = 4;

/// Scans a diff for declarations of endpoints and UI components using an
/// ordered registry of recognizers.
pub struct Identifier {
    recognizers: Vec<Recognizer>,
    prefixes: PrefixRules,
    sources: HashMap<String, String>,
}

impl Identifier {
    /// The built-in recognizers, registered in priority order.
    pub fn builtin() -> Result<Self, regex::Error> {
        let mut identifier = Self {
            recognizers: Vec::new(),
            prefixes: PrefixRules::new()?,
            sources: HashMap::new(),
        };
        for recognizer in recognizers::builtin()? {
            identifier.register(recognizer);
        }
        Ok(identifier)
    }

    /// Append a recognizer; it loses every tie against those already registered.
    pub fn register(&mut self, recognizer: Recognizer) {
        self.recognizers.push(recognizer);
    }

    /// Full contents of changed files, keyed by diff path. Used to resolve
    /// router prefixes declared away from the changed lines.
    pub fn with_sources(mut self, sources: HashMap<String, String>) -> Self {
        self.sources = sources;
        self
    }

    #[instrument(skip_all, fields(files = diff.files().len()))]
    pub fn identify(&self, diff: &DiffSet) -> Identification {
        let mut occurrences = Vec::new();
        let mut diagnostics = Vec::new();

        for file in diff.files() {
            let applicable: Vec<&Recognizer> = self
                .recognizers
                .iter()
                .filter(|r| r.dialect().family().covers(file.language_hint))
                .collect();
            if applicable.is_empty() {
                continue;
            }
            let source = self.sources.get(&file.path);

            for hunk in &file.hunks {
                let matches: Vec<Vec<(&Recognizer, Vec<Recognition>)>> = hunk
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| {
                        let trailing = trailing_window(&hunk.lines, i);
                        applicable
                            .iter()
                            .map(|r| (*r, r.recognize(&line.content, &trailing)))
                            .filter(|(_, found)| !found.is_empty())
                            .collect()
                    })
                    .collect();

                for (i, line) in hunk.lines.iter().enumerate() {
                    let Some(((kept, recognitions), runners_up)) = matches[i].split_first() else {
                        continue;
                    };
                    let (change, line_no) = match line.kind {
                        LineKind::Added => (ChangeTag::Added, line.new_line),
                        LineKind::Removed => (ChangeTag::Removed, line.old_line),
                        LineKind::Context => {
                            if !encloses_change(&hunk.lines, &matches, i) {
                                continue;
                            }
                            (ChangeTag::Modified, line.new_line)
                        }
                    };
                    let line_no = line_no.unwrap_or_default();

                    for (runner_up, others) in runners_up {
                        debug!(
                            file = %file.path,
                            line = line_no,
                            kept = kept.name(),
                            runner_up = runner_up.name(),
                            "ambiguous recognizer match"
                        );
                        for other in others {
                            diagnostics.push(AmbiguousMatch {
                                file: file.path.clone(),
                                line: line_no,
                                kept: kept.dialect(),
                                runner_up: runner_up.dialect(),
                                runner_up_kind: other.kind,
                                runner_up_identity: other.identity.clone(),
                            });
                        }
                    }

                    let prefix = source.and_then(|src| self.prefixes.prefix_for(kept.dialect(), src));
                    for recognition in recognitions {
                        let mut identity = recognition.identity.clone();
                        if let (InterfaceKind::Endpoint, Some(prefix)) = (recognition.kind, &prefix) {
                            identity.name = apply_prefix(prefix, &identity.name);
                        }
                        occurrences.push(InterfaceDescriptor {
                            kind: recognition.kind,
                            identity,
                            declaring_file: file.path.clone(),
                            declaring_line: line_no,
                            dialect: kept.dialect(),
                            change,
                            confidence: recognition.confidence,
                            search_literal: recognition.literal.clone(),
                        });
                    }
                }
            }
        }

        let descriptors = merge(occurrences);
        debug!(descriptors = descriptors.len(), ambiguous = diagnostics.len(), "identified interfaces");
        Identification {
            descriptors,
            diagnostics,
        }
    }
}

/// Following lines on the same side of the diff as `lines[index]`.
fn trailing_window(lines: &[DiffLine], index: usize) -> Vec<&str> {
    let old_side = lines[index].kind == LineKind::Removed;
    lines[index + 1..]
        .iter()
        .filter(|l| match l.kind {
            LineKind::Context => true,
            LineKind::Removed => old_side,
            LineKind::Added => !old_side,
        })
        .take(TRAILING_WINDOW)
        .map(|l| l.content.as_str())
        .collect()
}

/// A declaration on a context line counts as touched when the hunk changes a
/// line below it before the next declaration starts.
fn encloses_change<T>(lines: &[DiffLine], matches: &[Vec<T>], index: usize) -> bool {
    for (line, found) in lines.iter().zip(matches).skip(index + 1) {
        // A changed declaration belongs to itself, not to the enclosing one.
        if !found.is_empty() {
            return false;
        }
        if line.is_change() {
            return true;
        }
    }
    false
}

#[derive(Default)]
struct Sides {
    added: bool,
    removed: bool,
    modified: bool,
}

/// Collapse occurrences sharing `(kind, identity, declaring_file)`, keeping
/// first-appearance order.
fn merge(occurrences: Vec<InterfaceDescriptor>) -> Vec<InterfaceDescriptor> {
    let mut merged: IndexMap<DescriptorKey, (InterfaceDescriptor, Sides)> = IndexMap::new();

    for occurrence in occurrences {
        let (descriptor, sides) = merged
            .entry(occurrence.key())
            .or_insert_with(|| (occurrence.clone(), Sides::default()));

        let first_live = occurrence.change != ChangeTag::Removed
            && !sides.added
            && !sides.modified;
        if first_live {
            descriptor.declaring_line = occurrence.declaring_line;
            descriptor.dialect = occurrence.dialect;
            descriptor.search_literal = occurrence.search_literal.clone();
        }
        descriptor.confidence = descriptor.confidence.max(occurrence.confidence);
        match occurrence.change {
            ChangeTag::Added => sides.added = true,
            ChangeTag::Removed => sides.removed = true,
            ChangeTag::Modified => sides.modified = true,
        }
    }

    merged
        .into_values()
        .map(|(mut descriptor, sides)| {
            descriptor.change = match (sides.added, sides.removed, sides.modified) {
                (false, true, false) => ChangeTag::Removed,
                (true, false, false) => ChangeTag::Added,
                _ => ChangeTag::Modified,
            };
            descriptor
        })
        .collect()
}
