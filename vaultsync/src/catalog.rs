//! Comparison-catalog construction with include/exclude path filtering
//!
//! Include and exclude rules come straight from the user settings as
//! comma-separated strings: includes are literal path prefixes, excludes
//! are `*`-wildcards compiled to regexes with substring match semantics.

use regex::Regex;

use crate::error::{Result, SyncError};
use crate::fingerprint::{FileRecord, FingerprintStore};

/// Compiled include/exclude rules for vault paths.
pub struct PathFilter {
    includes: Vec<String>,
    excludes: Vec<Regex>,
}

impl PathFilter {
    /// Compile a filter from the raw comma-separated settings strings.
    ///
    /// Empty entries in either list are skipped; an empty include list
    /// means "include everything".
    pub fn new(include: &str, exclude: &str) -> Result<Self> {
        let includes = include
            .split(',')
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_owned)
            .collect();

        let mut excludes = Vec::new();
        for pattern in exclude.split(',') {
            if pattern.is_empty() {
                continue;
            }
            excludes.push(wildcard_to_regex(pattern)?);
        }

        Ok(Self { includes, excludes })
    }

    /// Check whether a vault-relative path passes the filter.
    ///
    /// A path is included when the include list is empty or it starts
    /// with at least one include prefix (plain string prefix, not
    /// path-segment-aware); exclusion is applied afterwards and can only
    /// remove.
    pub fn matches(&self, path: &str) -> bool {
        if !self.includes.is_empty() && !self.includes.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        !self.excludes.iter().any(|re| re.is_match(path))
    }
}

/// Compile one `*`-wildcard into a regex: every regex metacharacter
/// except `*` is escaped, `*` becomes `.*`, and matching is unanchored
/// (substring semantics).
fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => translated.push_str(".*"),
            '.' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\' => {
                translated.push('\\');
                translated.push(c);
            }
            _ => translated.push(c),
        }
    }

    Regex::new(&translated)
        .map_err(|e| SyncError::Pattern(format!("invalid exclude pattern '{}': {}", pattern, e)))
}

/// Build the comparison-ready catalog from the fingerprint store.
///
/// Entries come from whatever the store last computed, not a fresh
/// directory walk; callers refresh the store first. Sorted by path for
/// a deterministic payload.
pub fn build_catalog(store: &FingerprintStore, filter: &PathFilter) -> Vec<FileRecord> {
    let mut catalog: Vec<FileRecord> = store
        .records()
        .filter(|record| filter.matches(&record.path))
        .cloned()
        .collect();
    catalog.sort_by(|a, b| a.path.cmp(&b.path));
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn wildcard_matches_suffix_patterns() {
        let filter = PathFilter::new("", "*_draft.md").unwrap();

        assert!(!filter.matches("notes/x_draft.md"));
        assert!(filter.matches("notes/x_draft.txt"));
        assert!(filter.matches("notes/x.md"));
    }

    #[test]
    fn empty_include_list_includes_everything() {
        let filter = PathFilter::new("", "").unwrap();

        assert!(filter.matches("a.md"));
        assert!(filter.matches("deep/nested/b.md"));
    }

    #[test]
    fn include_prefixes_are_plain_string_prefixes() {
        let filter = PathFilter::new("notes/,journal", "").unwrap();

        assert!(filter.matches("notes/a.md"));
        assert!(filter.matches("journal2024/b.md"));
        assert!(!filter.matches("archive/c.md"));
    }

    #[test]
    fn empty_exclude_entry_excludes_nothing() {
        let filter = PathFilter::new("", "a,,b").unwrap();

        assert!(!filter.matches("a.md"));
        assert!(!filter.matches("b/x.md"));
        assert!(filter.matches("c.md"));
    }

    #[test]
    fn exclude_patterns_match_anywhere_in_the_path() {
        let filter = PathFilter::new("", "*.tmp").unwrap();

        assert!(!filter.matches("x.tmp"));
        assert!(!filter.matches("dir/y.tmp"));
        // Substring semantics: a later extension does not rescue the path.
        assert!(!filter.matches("dir/y.tmp.md"));
        assert!(filter.matches("dir/y.md"));
    }

    #[test]
    fn regex_metacharacters_are_taken_literally() {
        let filter = PathFilter::new("", "a+b").unwrap();

        assert!(!filter.matches("a+b.md"));
        assert!(filter.matches("aab.md"));
    }

    #[test]
    fn bad_pattern_reports_pattern_error() {
        // `*` explodes into `.*`, so no user pattern can break regex
        // compilation through metacharacters; exercise the error path via
        // the compiled size limit instead.
        let huge = "*".repeat(100_000);
        match PathFilter::new("", &huge) {
            Ok(filter) => assert!(!filter.matches("anything")),
            Err(SyncError::Pattern(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn catalog_reflects_store_contents_after_filtering() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("keep.md"), b"keep").await.unwrap();
        fs::write(temp.path().join("skip_draft.md"), b"draft").await.unwrap();

        let mut store =
            FingerprintStore::new(temp.path(), temp.path().join(".fingerprints.json"));
        store.refresh().await.unwrap();

        let filter = PathFilter::new("", "*_draft.md").unwrap();
        let catalog = build_catalog(&store, &filter);

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].path, "keep.md");
        assert_eq!(catalog[0].md5, store.get("keep.md").unwrap().md5);
    }
}
