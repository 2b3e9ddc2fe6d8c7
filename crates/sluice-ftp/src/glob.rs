use globset::{GlobBuilder, GlobMatcher};

/// A compiled filename pattern.
///
/// Patterns use single-path-component globbing: `*` and `?` never match a
/// separator, and `[...]` character classes are supported. Matching is
/// against the bare filename, never a path.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    matcher: GlobMatcher,
}

impl NameMatcher {
    pub fn new(pattern: &str) -> Result<Self, globset::Error> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?;
        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

/// One-shot convenience for a single match.
pub fn matches_name(pattern: &str, name: &str) -> Result<bool, globset::Error> {
    Ok(NameMatcher::new(pattern)?.is_match(name))
}
