use super::types::{DiffLine, DiffSet, FileChange, Hunk, Language, LineKind};
use super::DiffError;

/// Parse a unified diff string into a [`DiffSet`].
///
/// Each file section starts with `diff --git a/{path} b/{path}`; `---` and
/// `+++` lines only mark new (`--- /dev/null`) and deleted (`+++ /dev/null`)
/// files. Text without any git file header is rejected.
///
/// Hunks start with `@@ -{old_start},{old_count} +{new_start},{new_count} @@`
/// and the hunk body is consumed by count, so a removed line that happens to
/// read `-- foo` is never mistaken for a file header.
pub fn parse_diff(raw_diff: &str) -> Result<DiffSet, DiffError> {
    if raw_diff.trim().is_empty() {
        return Ok(DiffSet::default());
    }

    let mut files = Vec::new();
    let mut current_file: Option<FileChange> = None;
    let mut current_hunk: Option<HunkCursor> = None;

    for line in raw_diff.lines() {
        if let Some(cursor) = current_hunk.as_mut() {
            if cursor.is_open() {
                if HunkCursor::accepts(line) {
                    if let Some(file) = current_file.as_mut() {
                        cursor.push(file, line);
                    }
                    continue;
                }
                cursor.close();
            }
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            finish_file(&mut files, &mut current_file, &mut current_hunk);
            current_file = Some(new_file(parse_git_header(rest)?));
            continue;
        }

        if line.starts_with("@@") {
            let file = current_file
                .as_mut()
                .ok_or_else(|| DiffError::Unparseable("hunk header before any file header".to_string()))?;
            if let Some(done) = current_hunk.take() {
                file.hunks.push(done.hunk);
            }
            current_hunk = Some(HunkCursor::new(parse_hunk_header(line)?));
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            if let Some(file) = current_file.as_mut() {
                file.is_new |= is_dev_null(path);
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            if let Some(file) = current_file.as_mut() {
                file.is_deleted |= is_dev_null(path);
            }
            continue;
        }
    }

    finish_file(&mut files, &mut current_file, &mut current_hunk);

    if files.is_empty() {
        return Err(DiffError::Unparseable(
            "input is not empty but contains no file headers".to_string(),
        ));
    }
    Ok(DiffSet::new(files))
}

struct HunkCursor {
    hunk: Hunk,
    old_next: usize,
    new_next: usize,
    old_left: usize,
    new_left: usize,
}

impl HunkCursor {
    fn new(hunk: Hunk) -> Self {
        Self {
            old_next: hunk.old_start,
            new_next: hunk.new_start,
            old_left: hunk.old_count,
            new_left: hunk.new_count,
            hunk,
        }
    }

    fn is_open(&self) -> bool {
        self.old_left > 0 || self.new_left > 0
    }

    fn accepts(line: &str) -> bool {
        // Some tools strip the trailing space of blank context lines.
        line.is_empty() || matches!(line.as_bytes()[0], b'+' | b'-' | b' ' | b'\\')
    }

    fn close(&mut self) {
        self.old_left = 0;
        self.new_left = 0;
    }

    fn push(&mut self, file: &mut FileChange, line: &str) {
        // "\ No newline at end of file"
        if line.starts_with('\\') {
            return;
        }
        let (kind, content) = match line.chars().next() {
            Some('+') => (LineKind::Added, &line[1..]),
            Some('-') => (LineKind::Removed, &line[1..]),
            _ => (LineKind::Context, line.get(1..).unwrap_or("")),
        };

        let mut diff_line = DiffLine {
            kind,
            content: content.to_string(),
            old_line: None,
            new_line: None,
        };
        match kind {
            LineKind::Added => {
                diff_line.new_line = Some(self.new_next);
                self.new_next += 1;
                self.new_left = self.new_left.saturating_sub(1);
                file.additions += 1;
            }
            LineKind::Removed => {
                diff_line.old_line = Some(self.old_next);
                self.old_next += 1;
                self.old_left = self.old_left.saturating_sub(1);
                file.deletions += 1;
            }
            LineKind::Context => {
                diff_line.old_line = Some(self.old_next);
                diff_line.new_line = Some(self.new_next);
                self.old_next += 1;
                self.new_next += 1;
                self.old_left = self.old_left.saturating_sub(1);
                self.new_left = self.new_left.saturating_sub(1);
            }
        }
        self.hunk.lines.push(diff_line);
    }
}

fn new_file(path: String) -> FileChange {
    FileChange {
        language_hint: Language::from_path(&path),
        path,
        is_new: false,
        is_deleted: false,
        additions: 0,
        deletions: 0,
        hunks: Vec::new(),
    }
}

fn finish_file(
    files: &mut Vec<FileChange>,
    file: &mut Option<FileChange>,
    hunk: &mut Option<HunkCursor>,
) {
    if let (Some(file), Some(cursor)) = (file.as_mut(), hunk.take()) {
        file.hunks.push(cursor.hunk);
    }
    if let Some(file) = file.take() {
        files.push(file);
    }
}

fn parse_git_header(rest: &str) -> Result<String, DiffError> {
    let mut parts = rest.split_whitespace();
    let a_path = parts
        .next()
        .ok_or_else(|| DiffError::Unparseable("missing a/ path in diff header".to_string()))?;
    let b_path = parts
        .next()
        .ok_or_else(|| DiffError::Unparseable("missing b/ path in diff header".to_string()))?;
    Ok(b_path
        .strip_prefix("b/")
        .or_else(|| a_path.strip_prefix("a/"))
        .unwrap_or(b_path)
        .to_string())
}

fn is_dev_null(path: &str) -> bool {
    path.split('\t').next().unwrap_or(path).trim() == "/dev/null"
}

fn parse_hunk_header(line: &str) -> Result<Hunk, DiffError> {
    let header = line
        .trim()
        .strip_prefix("@@")
        .ok_or_else(|| DiffError::Unparseable("invalid hunk header".to_string()))?;
    let (ranges, section) = match header.split_once("@@") {
        Some((ranges, section)) => (ranges.trim(), section.trim()),
        None => (header.trim(), ""),
    };
    let mut parts = ranges.split_whitespace();
    let old_part = parts
        .next()
        .ok_or_else(|| DiffError::Unparseable("missing old range".to_string()))?;
    let new_part = parts
        .next()
        .ok_or_else(|| DiffError::Unparseable("missing new range".to_string()))?;

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (new_start, new_count) = parse_range(new_part, '+')?;

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        section: (!section.is_empty()).then(|| section.to_string()),
        lines: Vec::new(),
    })
}

fn parse_range(part: &str, prefix: char) -> Result<(usize, usize), DiffError> {
    let range = part
        .strip_prefix(prefix)
        .ok_or_else(|| DiffError::Unparseable(format!("invalid range prefix in {}", part)))?;
    let (start_str, count_str) = match range.split_once(',') {
        Some((start, count)) => (start, count),
        None => (range, "1"),
    };
    let start = start_str
        .parse::<usize>()
        .map_err(|_| DiffError::Unparseable(format!("invalid range start in {}", part)))?;
    let count = count_str
        .parse::<usize>()
        .map_err(|_| DiffError::Unparseable(format!("invalid range count in {}", part)))?;
    Ok((start, count))
}
