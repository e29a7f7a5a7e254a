//! Immutable per-run source set.

use std::collections::HashMap;

/// The named source files for one run plus the designated main module.
/// Supplied once per run and never mutated during execution; import
/// specifiers are matched against file names exactly (no relative-path
/// resolution).
#[derive(Debug, Clone, Default)]
pub struct SourceDir {
    /// Module name the main source is evaluated under.
    pub main_name: String,
    /// Source text of the main module.
    pub main_source: String,
    /// Additional importable modules, keyed by specifier.
    pub files: HashMap<String, String>,
}

impl SourceDir {
    /// A source dir containing only a main module.
    pub fn new(main_name: impl Into<String>, main_source: impl Into<String>) -> Self {
        Self {
            main_name: main_name.into(),
            main_source: main_source.into(),
            files: HashMap::new(),
        }
    }

    /// Add an importable module.
    pub fn with_file(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(name.into(), source.into());
        self
    }

    /// Source text for `specifier`: an exact `files` key, or the main
    /// module's own name.
    pub fn lookup(&self, specifier: &str) -> Option<&str> {
        if specifier == self.main_name {
            return Some(&self.main_source);
        }
        self.files.get(specifier).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_exact_match_only() {
        let dir = SourceDir::new("main.js", "export default () => 1;")
            .with_file("lib.js", "export const x = 1;");
        assert_eq!(dir.lookup("lib.js"), Some("export const x = 1;"));
        assert_eq!(dir.lookup("main.js"), Some("export default () => 1;"));
        assert_eq!(dir.lookup("./lib.js"), None);
        assert_eq!(dir.lookup("lib"), None);
    }
}
