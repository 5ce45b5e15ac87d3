//! Canonical relative paths and glob-based include/exclude filtering (§4.A).

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{EngineError, Result};

/// Normalize adapter-native input into the engine's canonical relative path:
/// POSIX separators, no leading separator, no `.`/`..` segments, case-sensitive.
///
/// Rejects paths that resolve above the root once `..` segments are collapsed.
pub fn normalize(input: &str) -> Result<String> {
    let input = input.replace('\\', "/");
    let mut stack: Vec<&str> = Vec::new();

    for segment in input.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return Err(EngineError::InvalidPath(format!(
                        "path escapes root: {}",
                        input
                    )));
                }
            }
            s => stack.push(s),
        }
    }

    Ok(stack.join("/"))
}

/// An ordered list of glob patterns deciding include/exclude for a path.
///
/// `*` matches within a path segment, `**` matches any number of segments,
/// and a trailing `/` matches a directory subtree. A path is included iff no
/// pattern matches it.
#[derive(Clone)]
pub struct Filter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl Filter {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let set = Self::build(&patterns)?;
        Ok(Self { patterns, set })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSetBuilder::new().build().expect("empty globset builds"),
        }
    }

    fn build(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let expanded = expand_directory_pattern(pattern);
            for p in expanded {
                let glob = Glob::new(&p)
                    .map_err(|e| EngineError::InvalidPath(format!("bad glob '{}': {}", p, e)))?;
                builder.add(glob);
            }
        }
        builder
            .build()
            .map_err(|e| EngineError::InvalidPath(format!("bad glob set: {}", e)))
    }

    /// Combine this filter's patterns with additional per-run excludes (§4.A),
    /// without mutating the original.
    pub fn with_additional(&self, extra: &[String]) -> Result<Self> {
        let mut patterns = self.patterns.clone();
        patterns.extend(extra.iter().cloned());
        Self::new(patterns)
    }

    pub fn is_included(&self, path: &str) -> bool {
        !self.set.is_match(path)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// A pattern ending in `/` matches the directory subtree: expand it into both
/// the directory itself and everything beneath it.
fn expand_directory_pattern(pattern: &str) -> Vec<String> {
    if let Some(stem) = pattern.strip_suffix('/') {
        vec![stem.to_string(), format!("{}/**", stem)]
    } else {
        vec![pattern.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_segments() {
        assert_eq!(normalize("a/./b/../c").unwrap(), "a/c");
    }

    #[test]
    fn normalize_converts_native_separators() {
        assert_eq!(normalize("a\\b\\c").unwrap(), "a/b/c");
    }

    #[test]
    fn normalize_strips_leading_separator() {
        assert_eq!(normalize("/a/b").unwrap(), "a/b");
    }

    #[test]
    fn normalize_rejects_escaping_root() {
        assert!(normalize("../outside").is_err());
        assert!(normalize("a/../../outside").is_err());
    }

    #[test]
    fn filter_star_matches_within_segment_only() {
        let f = Filter::new(["*.tmp"]).unwrap();
        assert!(!f.is_included("a.tmp"));
        assert!(f.is_included("dir/a.tmp"));
    }

    #[test]
    fn filter_doublestar_matches_any_depth() {
        let f = Filter::new(["**/*.tmp"]).unwrap();
        assert!(!f.is_included("a.tmp"));
        assert!(!f.is_included("dir/sub/a.tmp"));
    }

    #[test]
    fn filter_trailing_slash_matches_subtree() {
        let f = Filter::new(["node_modules/"]).unwrap();
        assert!(!f.is_included("node_modules"));
        assert!(!f.is_included("node_modules/pkg/index.js"));
        assert!(f.is_included("src/node_modules_helper.rs"));
    }

    #[test]
    fn filter_with_additional_does_not_mutate_original() {
        let base = Filter::new(["*.log"]).unwrap();
        let extended = base.with_additional(&["*.tmp".to_string()]).unwrap();
        assert!(base.is_included("a.tmp"));
        assert!(!extended.is_included("a.tmp"));
    }
}
