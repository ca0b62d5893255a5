use crate::chunking::truncate_at_char_boundary;

/// Default number of lines in a snippet when no term is found.
pub const DEFAULT_SNIPPET_LINES: usize = 4;

/// Maximum number of bytes in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_BYTES: usize = 400;

/// Extract a snippet around the first line containing any of `terms`.
///
/// Returns `(snippet_text, start_line)` where `start_line` is the 1-indexed
/// line of `text` the snippet starts at. Without a match the first few
/// non-blank lines are returned. Returns `None` if the text is blank.
pub fn extract_snippet(text: &str, terms: &[String]) -> Option<(String, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|line| !line.trim().is_empty())?;

    let match_idx = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        terms.iter().any(|term| lower.contains(&term.to_lowercase()))
    });

    let (start, end) = match match_idx {
        Some(idx) => (idx.saturating_sub(1).max(first), (idx + 2).min(lines.len())),
        None => (first, (first + DEFAULT_SNIPPET_LINES).min(lines.len())),
    };

    let joined = lines[start..end].join("\n");
    let mut snippet =
        truncate_at_char_boundary(&joined, DEFAULT_SNIPPET_MAX_BYTES).to_string();
    if snippet.len() < joined.len() {
        snippet.push_str("...");
    }

    Some((snippet, start + 1))
}

/// Indent every line of `text` by `width` spaces.
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn extract_snippet_match_found() {
        let text = "line1\nline2\nline3\nrust is great\nline5\nline6\nline7";
        let (snippet, start) = extract_snippet(text, &terms(&["Rust"])).unwrap();
        assert_eq!(snippet, "line3\nrust is great\nline5");
        assert_eq!(start, 3);
    }

    #[test]
    fn extract_snippet_no_match_returns_head() {
        let text = "\n\nline1\nline2\nline3\nline4\nline5\nline6";
        let (snippet, start) = extract_snippet(text, &terms(&["zzz"])).unwrap();
        assert_eq!(snippet, "line1\nline2\nline3\nline4");
        assert_eq!(start, 3);
    }

    #[test]
    fn extract_snippet_blank_text() {
        assert!(extract_snippet("", &terms(&["a"])).is_none());
        assert!(extract_snippet("\n  \n", &terms(&["a"])).is_none());
    }

    #[test]
    fn extract_snippet_truncates_on_char_boundary() {
        let text = "é".repeat(DEFAULT_SNIPPET_MAX_BYTES);
        let (snippet, _) = extract_snippet(&text, &[]).unwrap();
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() <= DEFAULT_SNIPPET_MAX_BYTES + 3);
    }

    #[test]
    fn indent_prefixes_each_line() {
        assert_eq!(indent("a\nb", 2), "  a\n  b");
    }
}
