// crates/ctx-server/src/config/ignore.rs
// Default include/exclude glob sets for the indexer and watcher

use glob::Pattern;

/// Default exclude globs. Deny wins over include.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/coverage/**",
    "**/__pycache__/**",
    "**/target/**",
    "**/*.min.*",
    "**/*.bundle.*",
    "**/.env*",
];

/// Default include glob: everything not excluded.
pub const DEFAULT_INCLUDES: &[&str] = &["**/*"];

/// Compiled include/exclude filter.
///
/// Paths are matched relative to the project root with `/` separators.
pub struct PathFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PathFilter {
    /// Compile a filter from glob strings. Invalid patterns are an error.
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, glob::PatternError> {
        let includes = if includes.is_empty() {
            DEFAULT_INCLUDES
                .iter()
                .map(|p| Pattern::new(p))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            includes
                .iter()
                .map(|p| Pattern::new(p))
                .collect::<Result<Vec<_>, _>>()?
        };
        let excludes = if excludes.is_empty() {
            DEFAULT_EXCLUDES
                .iter()
                .map(|p| Pattern::new(p))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            excludes
                .iter()
                .map(|p| Pattern::new(p))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self { includes, excludes })
    }

    /// Compile the default filter.
    pub fn default_filter() -> Self {
        // The built-in pattern lists are valid globs.
        Self::new(&[], &[]).unwrap_or(Self {
            includes: Vec::new(),
            excludes: Vec::new(),
        })
    }

    /// Test a project-relative path. Excludes are checked first (deny wins).
    pub fn matches(&self, relative_path: &str) -> bool {
        // Glob matching expects forward slashes regardless of platform.
        let normalized = relative_path.replace('\\', "/");
        if self.excludes.iter().any(|p| p.matches(&normalized)) {
            return false;
        }
        self.includes.iter().any(|p| p.matches(&normalized))
    }
}

/// Quick directory-name check used while walking, so excluded trees are
/// pruned without enumerating their contents.
pub fn should_skip_dir(name: &str) -> bool {
    name.starts_with('.')
        || matches!(
            name,
            "node_modules" | "dist" | "build" | "coverage" | "__pycache__" | "target"
        )
}
