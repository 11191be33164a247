//! DOI syntax validation and URL helpers

use regex_lite::Regex;
use std::sync::OnceLock;

/// Registration-agency patterns. A DOI is valid when any of them matches.
const DOI_PATTERNS: [&str; 5] = [
    r"^10.\d{4,9}/[-._;()/:A-Z0-9]+$",
    r"^10.1002/[^\s]+$",
    r"^10.\d{4}/\d+-\d+X?(\d+)\d+<[\d\w]+:[\d\w]*>\d+.\d+.\w+;\d$",
    r"^10.1021/\w\w\d+$",
    r"^10.1207/[\w\d]+&\d+_\d+$",
];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DOI_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!(pattern = p, error = %e, "Invalid DOI pattern");
                    None
                }
            })
            .collect()
    })
}

/// Whether the string is a syntactically valid DOI
pub fn is_valid(doi: &str) -> bool {
    let doi = doi.trim();
    !doi.is_empty() && patterns().iter().any(|re| re.is_match(doi))
}

/// Percent-encode a DOI for use in a URL path, keeping `/` separators
pub fn quote_path(doi: &str) -> String {
    urlencoding::encode(doi).replace("%2F", "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dois() {
        assert!(is_valid("10.1371/journal.pone.0141854"));
        assert!(is_valid("10.1002/(SICI)1097-4571(199806)49:8<693::AID-ASI4>3.0.CO;2-0"));
        assert!(is_valid("10.1021/ja01577a030"));
        assert!(is_valid("10.1207/s15327957pspr0203_4"));
        assert!(is_valid("10.1207/S15327965PLI1403&4_17"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(is_valid("10.5281/zenodo.1234"));
        assert!(is_valid("10.5281/ZENODO.1234"));
    }

    #[test]
    fn test_invalid_dois() {
        assert!(!is_valid("not-a-doi"));
        assert!(!is_valid(""));
        assert!(!is_valid("   "));
        assert!(!is_valid("11.1371/journal.pone.0141854"));
        assert!(!is_valid("10.1371/has space"));
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path("10.1371/journal.pone.0141854"), "10.1371/journal.pone.0141854");
        assert_eq!(quote_path("10.1002/abc<1>;2"), "10.1002/abc%3C1%3E%3B2");
    }
}
