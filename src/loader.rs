//! Source lookup for required namespaces.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Source text of a namespace and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub content: String,
    pub path: PathBuf,
}

/// Finds the source text backing a namespace name
pub trait SourceLocator {
    fn find_source(&self, namespace: &str) -> Option<Source>;
}

const EXTENSIONS: [&str; 2] = ["lisp", "clj"];

/// Whether `namespace` maps to files strictly below a search root: dotted
/// segments that are non-empty and free of path separators and drive colons
pub fn is_loadable_name(namespace: &str) -> bool {
    namespace
        .split('.')
        .all(|segment| !segment.is_empty() && !segment.contains(['/', '\\', ':']))
}

/// Relative paths tried for `namespace`, in order.
///
/// For `a.b-c` these are `a.b-c.lisp`, `a/b_c.lisp`, `src/a/b_c.lisp` and
/// `lib/a/b_c.lisp`, then the same with `.clj`. Names that could escape the
/// search root (see [`is_loadable_name`]) have no candidates.
pub fn candidate_paths(namespace: &str) -> Vec<PathBuf> {
    if !is_loadable_name(namespace) {
        return Vec::new();
    }
    let nested: PathBuf = namespace.replace('-', "_").split('.').collect();
    EXTENSIONS
        .iter()
        .flat_map(|ext| {
            [
                PathBuf::from(format!("{namespace}.{ext}")),
                nested.with_extension(ext),
                Path::new("src").join(&nested).with_extension(ext),
                Path::new("lib").join(&nested).with_extension(ext),
            ]
        })
        .collect()
}

/// Looks for namespace files under a list of root directories
#[derive(Debug, Clone)]
pub struct FileSystemLocator {
    roots: Vec<PathBuf>,
}

impl FileSystemLocator {
    pub fn new<P: Into<PathBuf>>(roots: impl IntoIterator<Item = P>) -> Self {
        FileSystemLocator {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }
}

impl Default for FileSystemLocator {
    fn default() -> Self {
        FileSystemLocator::new(["."])
    }
}

impl SourceLocator for FileSystemLocator {
    fn find_source(&self, namespace: &str) -> Option<Source> {
        if !is_loadable_name(namespace) {
            log::warn!("refusing to look up source for namespace {namespace:?}");
            return None;
        }
        let candidates = candidate_paths(namespace);
        for root in &self.roots {
            for candidate in &candidates {
                let path = root.join(candidate);
                if !path.is_file() {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        log::debug!("found source for {namespace} at {}", path.display());
                        return Some(Source { content, path });
                    }
                    Err(err) => log::warn!("cannot read {}: {err}", path.display()),
                }
            }
        }
        None
    }
}

/// In-memory namespace sources, keyed by namespace name
#[derive(Debug, Clone, Default)]
pub struct MemoryLocator {
    sources: HashMap<String, String>,
}

impl MemoryLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, namespace: &str, content: impl Into<String>) -> Self {
        self.sources.insert(namespace.to_owned(), content.into());
        self
    }
}

impl SourceLocator for MemoryLocator {
    fn find_source(&self, namespace: &str) -> Option<Source> {
        self.sources.get(namespace).map(|content| Source {
            content: content.clone(),
            path: PathBuf::from(format!("<memory>/{namespace}")),
        })
    }
}
