//! Frontmatter extraction for the YAML-like block at the top of a note.
//!
//! Only the handful of keys the indexer consumes are recognized; unknown
//! keys are ignored. The parser never fails: malformed input degrades to
//! an empty metadata record plus warnings.

/// Metadata parsed from a document's leading frontmatter block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocMeta {
    pub title: String,
    pub date: String,
    pub effective_date: String,
    pub project: String,
    pub tags: Vec<String>,
    pub source: String,
    pub confidentiality: String,
}

/// Parse a document into (metadata, body, warnings).
///
/// The frontmatter is the region between a leading `---\n` and the next
/// `\n---\n`. Without a terminator the whole content is the body and a
/// `frontmatter_unclosed` warning is emitted.
pub fn parse_frontmatter(content: &str) -> (DocMeta, &str, Vec<String>) {
    let mut meta = DocMeta::default();
    let mut warnings = Vec::new();

    if !content.starts_with("---\n") {
        return (meta, content, warnings);
    }
    let Some(end) = content[4..].find("\n---\n") else {
        warnings.push("frontmatter_unclosed".to_string());
        return (meta, content, warnings);
    };
    let fm = &content[4..4 + end];
    let body = &content[4 + end + 5..];

    let mut in_tags = false;
    for line in fm.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if in_tags {
            if let Some(item) = trimmed.strip_prefix("- ") {
                meta.tags.push(item.trim().to_string());
                continue;
            }
        }
        in_tags = false;

        let Some((raw_key, raw_value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = raw_key.trim().to_lowercase();
        let mut value = raw_value.trim().to_string();
        value = strip_outer_quotes(&value);

        match key.as_str() {
            "title" => meta.title = value,
            "date" => meta.date = value,
            "effective_date" => meta.effective_date = value,
            "project" => meta.project = value,
            "source" => meta.source = value,
            "confidentiality" => meta.confidentiality = value.to_lowercase(),
            "tags" => {
                if value.is_empty() {
                    in_tags = true;
                    continue;
                }
                let inner = value
                    .strip_prefix('[')
                    .and_then(|v| v.strip_suffix(']'))
                    .unwrap_or(&value);
                for t in inner.split(',') {
                    let t = t.trim().trim_matches(|c| c == '"' || c == '\'').trim();
                    if !t.is_empty() {
                        meta.tags.push(t.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    (meta, body, warnings)
}

/// Strip one matched pair of outer quotes, preserving inner colons and quotes.
fn strip_outer_quotes(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_frontmatter_returns_whole_body() {
        let (meta, body, warnings) = parse_frontmatter("just a note\n");
        assert_eq!(meta, DocMeta::default());
        assert_eq!(body, "just a note\n");
        assert!(warnings.is_empty());
    }

    #[test]
    fn basic_keys() {
        let content = "---\ntitle: Cache Meeting\ndate: 2025-02-01\nproject: Infra\nconfidentiality: Internal\n---\nbody here\n";
        let (meta, body, warnings) = parse_frontmatter(content);
        assert_eq!(meta.title, "Cache Meeting");
        assert_eq!(meta.date, "2025-02-01");
        assert_eq!(meta.project, "Infra");
        assert_eq!(meta.confidentiality, "internal");
        assert_eq!(body, "body here\n");
        assert!(warnings.is_empty());
    }

    #[test]
    fn unclosed_frontmatter_warns_and_keeps_content() {
        let content = "---\ntitle: Broken\nno terminator follows\n";
        let (meta, body, warnings) = parse_frontmatter(content);
        assert_eq!(meta, DocMeta::default());
        assert_eq!(body, content);
        assert_eq!(warnings, vec!["frontmatter_unclosed".to_string()]);
    }

    #[test]
    fn inline_bracketed_tags() {
        let content = "---\ntags: [infra, cache, \"quoted\"]\n---\nx\n";
        let (meta, _, _) = parse_frontmatter(content);
        assert_eq!(meta.tags, vec!["infra", "cache", "quoted"]);
    }

    #[test]
    fn comma_separated_tags() {
        let content = "---\ntags: alpha, beta\n---\nx\n";
        let (meta, _, _) = parse_frontmatter(content);
        assert_eq!(meta.tags, vec!["alpha", "beta"]);
    }

    #[test]
    fn block_scalar_tags() {
        let content = "---\ntags:\n- infra\n- cache\ntitle: After Tags\n---\nx\n";
        let (meta, _, _) = parse_frontmatter(content);
        assert_eq!(meta.tags, vec!["infra", "cache"]);
        assert_eq!(meta.title, "After Tags");
    }

    #[test]
    fn quoted_value_preserves_inner_colons() {
        let content = "---\ntitle: \"Q: the answer\"\n---\nx\n";
        let (meta, _, _) = parse_frontmatter(content);
        assert_eq!(meta.title, "Q: the answer");
    }

    #[test]
    fn unknown_keys_ignored() {
        let content = "---\nauthor: someone\ntitle: Kept\n---\nx\n";
        let (meta, _, _) = parse_frontmatter(content);
        assert_eq!(meta.title, "Kept");
    }

    #[test]
    fn effective_date_key() {
        let content = "---\ndate: 2024-01-01\neffective_date: 2025-06-01\n---\nx\n";
        let (meta, _, _) = parse_frontmatter(content);
        assert_eq!(meta.date, "2024-01-01");
        assert_eq!(meta.effective_date, "2025-06-01");
    }
}
