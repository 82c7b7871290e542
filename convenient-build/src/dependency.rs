//! Include dependency resolution
//!
//! Scans translation units for `#include` directives and resolves local
//! (quoted) includes against the configured include paths, following each
//! resolved header recursively. System (angle-bracket) includes are not
//! tracked. The resolved set for a source is cached and reused for as long
//! as the source's modification time stays the same.

use crate::fs_utils::modified_nanos;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// A single `#include` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// Name between the delimiters (e.g. `util/log.h`)
    pub name: String,
    /// `true` for `<...>`, `false` for `"..."`
    pub system: bool,
}

impl IncludeDirective {
    /// Parse one source line.
    ///
    /// Accepts `#include "x"` and `#include <x>` with optional whitespace
    /// after `#` and before the name. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim_start().strip_prefix('#')?;
        let rest = rest.trim_start().strip_prefix("include")?;
        let rest = rest.trim_start();

        let (system, close) = match rest.chars().next()? {
            '"' => (false, '"'),
            '<' => (true, '>'),
            _ => return None,
        };
        let body = &rest[1..];
        let end = body.find(close)?;
        let name = &body[..end];
        if name.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            system,
        })
    }
}

#[derive(Debug, Clone)]
struct CachedDependencies {
    source_mtime: i64,
    dependencies: BTreeSet<PathBuf>,
}

/// Computes and caches the transitive local includes of each source
#[derive(Debug, Default)]
pub struct DependencyResolver {
    include_paths: Vec<PathBuf>,
    cache: HashMap<PathBuf, CachedDependencies>,
}

impl DependencyResolver {
    /// Create a resolver searching `include_paths` in order
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self {
            include_paths,
            cache: HashMap::new(),
        }
    }

    /// Include search path
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Transitive set of resolvable local includes of `source`.
    ///
    /// Served from the cache when the source's mtime has not changed since
    /// the last scan; otherwise rescanned and the cache entry replaced.
    pub fn resolve(&mut self, source: &Path) -> &BTreeSet<PathBuf> {
        let source_mtime = modified_nanos(source).unwrap_or(i64::MIN);

        let fresh = self
            .cache
            .get(source)
            .is_some_and(|cached| cached.source_mtime == source_mtime);

        if fresh {
            trace!("Using cached dependencies for {}", source.display());
        } else {
            debug!("Parsing dependencies for {}", source.display());
            let dependencies = self.scan(source);
            self.cache.insert(
                source.to_path_buf(),
                CachedDependencies {
                    source_mtime,
                    dependencies,
                },
            );
        }

        &self
            .cache
            .entry(source.to_path_buf())
            .or_insert_with(|| CachedDependencies {
                source_mtime,
                dependencies: BTreeSet::new(),
            })
            .dependencies
    }

    /// Forget every cached dependency set
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of sources with a cached dependency set
    pub fn cached_sources(&self) -> usize {
        self.cache.len()
    }

    /// Walk the include graph from `source` with an explicit work list.
    ///
    /// `visited` holds canonical paths so a header reached through two
    /// spellings, or a cycle back to the source, is expanded once.
    fn scan(&self, source: &Path) -> BTreeSet<PathBuf> {
        let mut dependencies = BTreeSet::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(canonical(source));

        let mut pending = vec![source.to_path_buf()];
        while let Some(file) = pending.pop() {
            let content = match fs::read(&file) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Cannot read {} for include scanning: {}", file.display(), e);
                    continue;
                }
            };

            for include in content.lines().filter_map(IncludeDirective::parse) {
                if include.system {
                    trace!("Skipping system header <{}>", include.name);
                    continue;
                }

                let Some(resolved) = self.find_include(&include.name) else {
                    debug!(
                        "Include \"{}\" from {} not found in include paths",
                        include.name,
                        file.display()
                    );
                    continue;
                };

                if visited.insert(canonical(&resolved)) {
                    debug!("Adding dependency {} for {}", resolved.display(), source.display());
                    dependencies.insert(resolved.clone());
                    pending.push(resolved);
                }
            }
        }

        dependencies
    }

    /// First include path containing `name`
    fn find_include(&self, name: &str) -> Option<PathBuf> {
        self.include_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_include_directives() {
        assert_eq!(
            IncludeDirective::parse("#include \"util.h\""),
            Some(IncludeDirective { name: "util.h".to_string(), system: false })
        );
        assert_eq!(
            IncludeDirective::parse("  #  include <vector>  // std"),
            Some(IncludeDirective { name: "vector".to_string(), system: true })
        );
        assert_eq!(
            IncludeDirective::parse("#include\"a/b.hpp\""),
            Some(IncludeDirective { name: "a/b.hpp".to_string(), system: false })
        );
        assert_eq!(IncludeDirective::parse("#define X 1"), None);
        assert_eq!(IncludeDirective::parse("// #include \"x.h\""), None);
        assert_eq!(IncludeDirective::parse("#include MACRO"), None);
        assert_eq!(IncludeDirective::parse("#include \"unterminated"), None);
        assert_eq!(IncludeDirective::parse("#include \"\""), None);
    }

    #[test]
    fn test_resolves_transitive_local_includes() {
        let tmp = TempDir::new().unwrap();
        let inc = tmp.path().join("include");
        let a_h = write(&inc, "a.h", "#include \"b.h\"\n#include <string>\n");
        let b_h = write(&inc, "b.h", "#include \"c.h\"\n");
        let c_h = write(&inc, "c.h", "int c();\n");
        let main = write(tmp.path(), "main.cpp", "#include \"a.h\"\n#include <vector>\n");

        let mut resolver = DependencyResolver::new(vec![inc]);
        let deps = resolver.resolve(&main).clone();

        assert_eq!(deps, BTreeSet::from([a_h, b_h, c_h]));
    }

    #[test]
    fn test_first_include_path_wins() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        let winner = write(&first, "config.h", "");
        write(&second, "config.h", "");
        let main = write(tmp.path(), "main.c", "#include \"config.h\"\n");

        let mut resolver = DependencyResolver::new(vec![first.clone(), second.clone()]);

        assert_eq!(resolver.include_paths(), &[first, second]);
        assert_eq!(resolver.resolve(&main), &BTreeSet::from([winner]));
    }

    #[test]
    fn test_unresolved_include_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let inc = tmp.path().join("include");
        let present = write(&inc, "present.h", "");
        let main = write(
            tmp.path(),
            "main.c",
            "#include \"missing.h\"\n#include \"present.h\"\n",
        );

        let mut resolver = DependencyResolver::new(vec![inc]);

        assert_eq!(resolver.resolve(&main), &BTreeSet::from([present]));
    }

    #[test]
    fn test_mutual_include_cycle_terminates() {
        let tmp = TempDir::new().unwrap();
        let inc = tmp.path().join("include");
        let a_h = write(&inc, "a.h", "#include \"b.h\"\n");
        let b_h = write(&inc, "b.h", "#include \"a.h\"\n");
        let main = write(tmp.path(), "main.c", "#include \"a.h\"\n");

        let mut resolver = DependencyResolver::new(vec![inc]);

        assert_eq!(resolver.resolve(&main), &BTreeSet::from([a_h, b_h]));
    }

    #[test]
    fn test_self_including_header_terminates() {
        let tmp = TempDir::new().unwrap();
        let inc = tmp.path().join("include");
        let me = write(&inc, "me.h", "#include \"me.h\"\n");
        let main = write(tmp.path(), "main.c", "#include \"me.h\"\n");

        let mut resolver = DependencyResolver::new(vec![inc]);

        assert_eq!(resolver.resolve(&main), &BTreeSet::from([me]));
    }

    #[test]
    fn test_header_including_the_source_terminates() {
        let tmp = TempDir::new().unwrap();
        let main = write(tmp.path(), "main.h", "#include \"loop.h\"\n");
        let loop_h = write(tmp.path(), "loop.h", "#include \"main.h\"\n");

        let mut resolver = DependencyResolver::new(vec![tmp.path().to_path_buf()]);

        assert_eq!(resolver.resolve(&main), &BTreeSet::from([loop_h]));
    }

    #[test]
    fn test_cache_reused_until_source_mtime_changes() {
        let tmp = TempDir::new().unwrap();
        let inc = tmp.path().join("include");
        let a_h = write(&inc, "a.h", "");
        let b_h = write(&inc, "b.h", "");
        let main = write(tmp.path(), "main.c", "#include \"a.h\"\n");
        filetime::set_file_mtime(&main, FileTime::from_unix_time(1_000, 0)).unwrap();

        let mut resolver = DependencyResolver::new(vec![inc]);
        assert_eq!(resolver.resolve(&main), &BTreeSet::from([a_h.clone()]));

        // Same mtime: the edit goes unnoticed and the cached set is served
        fs::write(&main, "#include \"b.h\"\n").unwrap();
        filetime::set_file_mtime(&main, FileTime::from_unix_time(1_000, 0)).unwrap();
        assert_eq!(resolver.resolve(&main), &BTreeSet::from([a_h]));

        // New mtime: full rescan replaces the entry
        filetime::set_file_mtime(&main, FileTime::from_unix_time(2_000, 0)).unwrap();
        assert_eq!(resolver.resolve(&main), &BTreeSet::from([b_h]));
        assert_eq!(resolver.cached_sources(), 1);

        resolver.clear();
        assert_eq!(resolver.cached_sources(), 0);
    }
}
