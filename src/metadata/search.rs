//! Search query matching semantics (§4.7, Open Question resolution in
//! `SPEC_FULL.md`): a plain query is a case-sensitive substring match
//! against the filename; a query containing `*` is compiled to an anchored
//! glob over the filename. Neither form considers the folder path.

/// Whether `filename` matches `query` under the server's search semantics.
pub fn matches(query: &str, filename: &str) -> bool {
    if query.contains('*') {
        glob_match(query.as_bytes(), filename.as_bytes())
    } else {
        filename.contains(query)
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..])),
        Some(&c) => !text.is_empty() && text[0] == c && glob_match(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_query_is_substring() {
        assert!(matches("note", "my_notes.txt"));
        assert!(!matches("zzz", "my_notes.txt"));
    }

    #[test]
    fn glob_with_star_is_anchored() {
        assert!(matches("*.txt", "report.txt"));
        assert!(!matches("*.txt", "report.txt.bak"));
        assert!(matches("report.*", "report.txt"));
        assert!(matches("*", "anything"));
    }
}
