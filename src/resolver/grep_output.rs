use super::types::SearchHit;

/// Parse grep-style output produced with NUL-terminated file names:
/// `path\0LINE:content` for matches, `path\0LINE-content` for context lines,
/// and `--` between non-adjacent groups.
pub fn parse_grep_output(output: &str, context_lines: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let mut group: Vec<Record> = Vec::new();

    for raw in output.lines() {
        if raw == "--" {
            flush(&mut group, context_lines, &mut hits);
            continue;
        }
        let Some(record) = Record::parse(raw) else {
            continue;
        };
        if group.last().is_some_and(|last| last.path != record.path) {
            flush(&mut group, context_lines, &mut hits);
        }
        group.push(record);
    }
    flush(&mut group, context_lines, &mut hits);
    hits
}

struct Record {
    path: String,
    line: usize,
    content: String,
    is_match: bool,
}

impl Record {
    fn parse(raw: &str) -> Option<Self> {
        let (path, rest) = raw.split_once('\0')?;
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let line = rest[..digits].parse().ok()?;
        let is_match = match rest[digits..].chars().next()? {
            ':' => true,
            '-' => false,
            _ => return None,
        };
        Some(Self {
            path: path.trim_start_matches("./").to_string(),
            line,
            content: rest[digits + 1..].to_string(),
            is_match,
        })
    }
}

fn flush(group: &mut Vec<Record>, context_lines: usize, hits: &mut Vec<SearchHit>) {
    for (i, record) in group.iter().enumerate().filter(|(_, r)| r.is_match) {
        let start = i.saturating_sub(context_lines);
        let end = (i + 1 + context_lines).min(group.len());
        let mut hit = SearchHit::new(&record.path, Some(record.line), &record.content);
        hit.before = group[start..i].iter().map(|r| r.content.clone()).collect();
        hit.after = group[i + 1..end].iter().map(|r| r.content.clone()).collect();
        hits.push(hit);
    }
    group.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_without_context() {
        let output = "src/routes/users.ts\x0012:router.post('/api/users', create);\napp/api.py\x003:    call('/api/users')\n";
        let hits = parse_grep_output(output, 0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "src/routes/users.ts");
        assert_eq!(hits[0].line, Some(12));
        assert_eq!(hits[0].content, "router.post('/api/users', create);");
        assert_eq!(hits[1].path, "app/api.py");
    }

    #[test]
    fn test_context_groups() {
        let output = "\
./a-1-b.ts\x004-before
./a-1-b.ts\x005:hit: one
./a-1-b.ts\x006-after
--
./a-1-b.ts\x0020-x
./a-1-b.ts\x0021:hit two
";
        let hits = parse_grep_output(output, 1);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a-1-b.ts");
        assert_eq!(hits[0].content, "hit: one");
        assert_eq!(hits[0].before, vec!["before"]);
        assert_eq!(hits[0].after, vec!["after"]);
        assert_eq!(hits[1].line, Some(21));
        assert_eq!(hits[1].before, vec!["x"]);
        assert!(hits[1].after.is_empty());
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        assert!(parse_grep_output("Binary file x matches\nno-nul-here:1:x\n", 0).is_empty());
    }
}
