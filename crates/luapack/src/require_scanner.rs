//! Lexical extraction of `require` calls
//!
//! Only literal calls with parentheses, `require("a.b")` or `require('a/b')`,
//! are recognized. Dynamic requires (`require(name)`) and the
//! call-without-parentheses sugar are not detected.

use once_cell::sync::Lazy;
use regex::Regex;

static REQUIRE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"require\s*\(\s*['"]([\w./-]+)['"]\s*\)"#)
        .expect("require pattern should be a valid regex")
});

/// Require identifiers in order of appearance, duplicates included
pub fn find_requires(source: &str) -> Vec<&str> {
    REQUIRE_PATTERN
        .captures_iter(source)
        .filter_map(|captures| captures.get(1))
        .map(|id| id.as_str())
        .collect()
}
