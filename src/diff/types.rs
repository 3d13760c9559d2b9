use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Source language guessed from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Go,
    Java,
    Ruby,
    Php,
    Unknown,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("ts" | "tsx") => Language::TypeScript,
            Some("js" | "jsx" | "mjs" | "cjs") => Language::JavaScript,
            Some("py") => Language::Python,
            Some("rs") => Language::Rust,
            Some("go") => Language::Go,
            Some("java" | "kt") => Language::Java,
            Some("rb") => Language::Ruby,
            Some("php") => Language::Php,
            _ => Language::Unknown,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

/// One line of a hunk with its position on each side of the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Line text without the leading `+`, `-` or space marker
    pub content: String,
    /// Line number in the original file (removed and context lines)
    pub old_line: Option<usize>,
    /// Line number in the new file (added and context lines)
    pub new_line: Option<usize>,
}

impl DiffLine {
    pub fn is_change(&self) -> bool {
        self.kind != LineKind::Context
    }
}

/// A contiguous region of changes within a file.
#[derive(Debug, Clone)]
pub struct Hunk {
    /// Starting line number in the old file
    pub old_start: usize,
    /// Number of lines in the old file
    pub old_count: usize,
    /// Starting line number in the new file
    pub new_start: usize,
    /// Number of lines in the new file
    pub new_count: usize,
    /// Function context git prints after the closing `@@`, if any
    pub section: Option<String>,
    pub lines: Vec<DiffLine>,
}

/// A single file within the diff.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// File path (e.g., "src/routes/users.ts")
    pub path: String,
    pub language_hint: Language,
    pub is_new: bool,
    pub is_deleted: bool,
    pub additions: usize,
    pub deletions: usize,
    pub hunks: Vec<Hunk>,
}

/// Parsed form of a unified diff. Built once by [`super::parse_diff`] and
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct DiffSet {
    files: Vec<FileChange>,
}

impl DiffSet {
    pub(crate) fn new(files: Vec<FileChange>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[FileChange] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn additions(&self) -> usize {
        self.files.iter().map(|f| f.additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.files.iter().map(|f| f.deletions).sum()
    }

    /// Per-file statistics plus the changed lines, cut off at `excerpt_chars`.
    pub fn summary(&self, excerpt_chars: usize) -> DiffSummary {
        let files = self
            .files
            .iter()
            .map(|f| FileStat {
                path: f.path.clone(),
                additions: f.additions,
                deletions: f.deletions,
                is_new: f.is_new,
                is_deleted: f.is_deleted,
            })
            .collect();

        let mut excerpt = String::new();
        let mut total = 0usize;
        let mut truncated = false;
        let mut push = |rendered: String| {
            total += rendered.len();
            if !truncated && excerpt.len() + rendered.len() <= excerpt_chars {
                excerpt.push_str(&rendered);
            } else {
                truncated = true;
            }
        };
        for file in &self.files {
            push(format!("--- {}\n", file.path));
            for hunk in &file.hunks {
                if let Some(section) = &hunk.section {
                    push(format!("@@ {}\n", section));
                }
                for line in &hunk.lines {
                    let marker = match line.kind {
                        LineKind::Added => '+',
                        LineKind::Removed => '-',
                        LineKind::Context => continue,
                    };
                    push(format!("{}{}\n", marker, line.content));
                }
            }
        }
        if truncated {
            excerpt.push_str(&format!("... (diff truncated, {} characters total)\n", total));
        }

        DiffSummary { files, excerpt }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub path: String,
    pub additions: usize,
    pub deletions: usize,
    pub is_new: bool,
    pub is_deleted: bool,
}

/// Compact description of a diff used as the opening section of a prompt.
#[derive(Debug, Clone)]
pub struct DiffSummary {
    pub files: Vec<FileStat>,
    pub excerpt: String,
}

impl DiffSummary {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let status = if file.is_new {
                " (new)"
            } else if file.is_deleted {
                " (deleted)"
            } else {
                ""
            };
            out.push_str(&format!(
                "- {}{} +{} -{}\n",
                file.path, status, file.additions, file.deletions
            ));
        }
        if !self.excerpt.is_empty() {
            out.push_str("\n```diff\n");
            out.push_str(&self.excerpt);
            out.push_str("```\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path("src/routes/users.ts"), Language::TypeScript);
        assert_eq!(Language::from_path("app/Main.JAVA"), Language::Java);
        assert_eq!(Language::from_path("api/views.py"), Language::Python);
        assert_eq!(Language::from_path("Makefile"), Language::Unknown);
    }

    #[test]
    fn test_summary_truncates_with_marker() {
        let line = |i: usize| DiffLine {
            kind: LineKind::Added,
            content: format!("line number {}", i),
            old_line: None,
            new_line: Some(i),
        };
        let diff = DiffSet::new(vec![FileChange {
            path: "a.py".to_string(),
            language_hint: Language::Python,
            is_new: true,
            is_deleted: false,
            additions: 50,
            deletions: 0,
            hunks: vec![Hunk {
                old_start: 0,
                old_count: 0,
                new_start: 1,
                new_count: 50,
                section: None,
                lines: (1..=50).map(line).collect(),
            }],
        }]);

        let summary = diff.summary(120);
        assert!(summary.excerpt.contains("diff truncated"));
        assert!(summary.excerpt.starts_with("--- a.py\n+line number 1\n"));
        assert_eq!(summary.files[0].additions, 50);
        assert!(summary.render().contains("- a.py (new) +50 -0"));
    }

    #[test]
    fn test_summary_keeps_hunk_function_context() {
        let diff = crate::diff::parse_diff(
            "diff --git a/app.py b/app.py\n--- a/app.py\n+++ b/app.py\n@@ -3,2 +3,3 @@ def create_app():\n     app = Flask(__name__)\n+    app.register_blueprint(users)\n     return app\n",
        )
        .unwrap();
        let summary = diff.summary(1000);
        assert_eq!(
            summary.excerpt,
            "--- app.py\n@@ def create_app():\n+    app.register_blueprint(users)\n"
        );
    }
}
