//! Parser for the semi-structured option strings found in recognition
//! manifests, e.g. `1. ['wash dishes', 'dry hands'] 2. ['open door']`.

use std::sync::LazyLock;

use regex::Regex;

static OPTION_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    // Numbered bracket groups; the bracket body is matched lazily so
    // adjacent groups do not merge.
    Regex::new(r"(\d+)\.\s*\[(.*?)\]").unwrap()
});

/// Parse an option string into ordered `(key, phrases)` pairs.
///
/// Each phrase is split on commas, trimmed, and stripped of surrounding
/// single quotes. Input that matches no group yields an empty vec rather
/// than an error, matching the tolerant manifests this parser feeds on.
pub fn parse_options(raw: &str) -> Vec<(String, Vec<String>)> {
    OPTION_BLOCK
        .captures_iter(raw)
        .map(|cap| {
            let key = cap[1].to_string();
            let phrases = cap[2]
                .split(',')
                .map(|item| item.trim().trim_matches('\'').to_string())
                .collect();
            (key, phrases)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_numbered_bracket_groups_in_order() {
        let raw = "1. ['wash dishes', 'dry hands'] 2. ['open door']";
        let parsed = parse_options(raw);
        assert_eq!(
            parsed,
            vec![
                (
                    "1".to_string(),
                    vec!["wash dishes".to_string(), "dry hands".to_string()]
                ),
                ("2".to_string(), vec!["open door".to_string()]),
            ]
        );
    }

    #[test]
    fn strips_whitespace_and_single_quotes() {
        let parsed = parse_options("3. [ 'run' ,  'jump'  ]");
        assert_eq!(
            parsed,
            vec![("3".to_string(), vec!["run".to_string(), "jump".to_string()])]
        );
    }

    #[test]
    fn unmatched_input_yields_empty() {
        assert!(parse_options("no options here").is_empty());
        assert!(parse_options("").is_empty());
    }

    #[test]
    fn empty_brackets_yield_single_empty_phrase() {
        // Splitting an empty body on ',' gives one empty item; the original
        // parser behaves the same way, so this is preserved.
        let parsed = parse_options("1. []");
        assert_eq!(parsed, vec![("1".to_string(), vec![String::new()])]);
    }

    #[test]
    fn lazy_body_match_keeps_groups_separate() {
        let parsed = parse_options("1. ['a'] trailing 2. ['b']");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].1, vec!["b".to_string()]);
    }
}
