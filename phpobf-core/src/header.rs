//! Per-subtree header banners
//!
//! A directive file placed in any source directory names the banner for that
//! directory and everything below it. When directives nest, the deepest one
//! wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::path_utils::dir_key;

/// Fixed name of the directive file
pub const DIRECTIVE_FILE: &str = "config.cnf";

/// A directive: the directory it governs and the template to prepend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    /// Directory key (`a/c/`, or "" for the source root)
    pub prefix: String,
    /// Absolute path of the directive file
    pub template: PathBuf,
}

/// Whether a path names a directive file
pub fn is_directive(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(DIRECTIVE_FILE)
}

/// Longest-prefix header lookup with a per-directory memo
#[derive(Debug, Default)]
pub struct HeaderResolver {
    rules: Vec<HeaderRule>,
    memo: HashMap<String, Option<PathBuf>>,
}

impl HeaderResolver {
    pub fn new(rules: Vec<HeaderRule>) -> Self {
        Self {
            rules,
            memo: HashMap::new(),
        }
    }

    /// Collect every directive file under `source_dir`
    pub fn discover(source_dir: &Path) -> Result<Self> {
        let mut rules = Vec::new();

        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::walk(source_dir, e))?;
            if !entry.file_type().is_file() || !is_directive(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(source_dir)
                .unwrap_or(entry.path());
            let prefix = dir_key(relative.parent().unwrap_or(Path::new("")));
            tracing::debug!("Header directive for '{}': {}", prefix, entry.path().display());
            rules.push(HeaderRule {
                prefix,
                template: entry.path().to_path_buf(),
            });
        }

        rules.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[HeaderRule] {
        &self.rules
    }

    /// Number of directories resolved so far
    pub fn cached(&self) -> usize {
        self.memo.len()
    }

    /// Template for files in `dir` (relative to the source root)
    pub fn resolve(&mut self, dir: &Path) -> Option<PathBuf> {
        let key = dir_key(dir);
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }

        let template = self
            .rules
            .iter()
            .filter(|rule| key.starts_with(&rule.prefix))
            .max_by_key(|rule| rule.prefix.len())
            .map(|rule| rule.template.clone());

        self.memo.insert(key, template.clone());
        template
    }
}

/// Substitute `{year}` and `{date}` (and the `{$year}`/`{$date}` spellings)
pub fn render_header(template: &str, now: &DateTime<Local>) -> String {
    let year = now.format("%Y").to_string();
    let date = now.format("%Y-%m-%d %H:%M:%S (%:z)").to_string();

    template
        .replace("{$year}", &year)
        .replace("{$date}", &date)
        .replace("{year}", &year)
        .replace("{date}", &date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn rule(prefix: &str) -> HeaderRule {
        HeaderRule {
            prefix: prefix.to_string(),
            template: PathBuf::from(format!("/src/{}{}", prefix, DIRECTIVE_FILE)),
        }
    }

    #[test]
    fn test_deepest_directive_wins() {
        let mut resolver = HeaderResolver::new(vec![rule("a/c/d/"), rule("a/")]);

        assert_eq!(resolver.resolve(Path::new("a/b")), Some(rule("a/").template));
        assert_eq!(resolver.resolve(Path::new("a/c")), Some(rule("a/").template));
        assert_eq!(resolver.resolve(Path::new("a/c/d")), Some(rule("a/c/d/").template));
        assert_eq!(resolver.resolve(Path::new("a/c/d/e")), Some(rule("a/c/d/").template));
    }

    #[test]
    fn test_order_of_rules_is_irrelevant() {
        let mut forward = HeaderResolver::new(vec![rule("a/"), rule("a/c/d/")]);
        let mut backward = HeaderResolver::new(vec![rule("a/c/d/"), rule("a/")]);
        for dir in ["a", "a/c", "a/c/d"] {
            assert_eq!(forward.resolve(Path::new(dir)), backward.resolve(Path::new(dir)));
        }
    }

    #[test]
    fn test_no_partial_name_match() {
        let mut resolver = HeaderResolver::new(vec![rule("a/")]);
        assert_eq!(resolver.resolve(Path::new("ab")), None);
        assert_eq!(resolver.resolve(Path::new("")), None);
    }

    #[test]
    fn test_root_directive_covers_everything() {
        let mut resolver = HeaderResolver::new(vec![rule(""), rule("lib/")]);
        assert_eq!(resolver.resolve(Path::new("")), Some(rule("").template));
        assert_eq!(resolver.resolve(Path::new("vendor/x")), Some(rule("").template));
        assert_eq!(resolver.resolve(Path::new("lib/x")), Some(rule("lib/").template));
    }

    #[test]
    fn test_misses_are_memoized() {
        let mut resolver = HeaderResolver::new(vec![rule("a/")]);
        assert_eq!(resolver.resolve(Path::new("z")), None);
        assert_eq!(resolver.resolve(Path::new("z/")), None);
        assert_eq!(resolver.resolve(Path::new("a/b")), Some(rule("a/").template));
        assert_eq!(resolver.cached(), 2);
    }

    #[test]
    fn test_discover_directives() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/c/d")).unwrap();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a").join(DIRECTIVE_FILE), "/* a */").unwrap();
        fs::write(root.join("a/c/d").join(DIRECTIVE_FILE), "/* d */").unwrap();
        fs::write(root.join("a/b/x.php"), "<?php").unwrap();

        let mut resolver = HeaderResolver::discover(root).unwrap();
        let prefixes: Vec<&str> = resolver.rules().iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["a/", "a/c/d/"]);

        assert_eq!(
            resolver.resolve(Path::new("a/b")),
            Some(root.join("a").join(DIRECTIVE_FILE))
        );
        assert_eq!(
            resolver.resolve(Path::new("a/c")),
            Some(root.join("a").join(DIRECTIVE_FILE))
        );
        assert_eq!(
            resolver.resolve(Path::new("a/c/d")),
            Some(root.join("a/c/d").join(DIRECTIVE_FILE))
        );
    }

    #[test]
    fn test_render_header() {
        let now = Local.with_ymd_and_hms(2031, 12, 1, 8, 5, 9).unwrap();
        let rendered = render_header("/* {year} | {$year} | {date} */\n", &now);
        assert!(rendered.starts_with("/* 2031 | 2031 | 2031-12-01 08:05:09 ("));
        assert!(rendered.ends_with(") */\n"));
        assert_eq!(render_header("no tokens", &now), "no tokens");
    }

    #[test]
    fn test_is_directive() {
        assert!(is_directive(Path::new("a/b/config.cnf")));
        assert!(!is_directive(Path::new("a/b/config.cnf.bak")));
        assert!(!is_directive(Path::new("a/b/other.cnf")));
    }
}
