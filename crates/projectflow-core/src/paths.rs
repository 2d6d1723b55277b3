//! Path resolution and directory management
//!
//! Task bodies and the engine's skip checks go through [`PathResolver`]; the
//! orchestrator itself never decides whether an unresolved name is fatal.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::config::{DirectoryConfig, PathsConfig};
use crate::error::PathError;

/// How deep the resolver descends into each search directory
const SEARCH_DEPTH: usize = 8;

/// Behaviour when a logical name is not found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Report [`PathError::NotFound`]
    #[default]
    Strict,
    /// Return a path constructed under the first search directory
    Construct,
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The file exists at this path
    Found(PathBuf),
    /// Nothing exists yet; this is where it would live
    Constructed(PathBuf),
}

impl Resolved {
    pub fn path(&self) -> &Path {
        match self {
            Self::Found(p) | Self::Constructed(p) => p,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Self::Found(p) | Self::Constructed(p) => p,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Resolves logical names to paths and answers existence queries
pub trait PathResolver: Send + Sync {
    /// Resolve a logical name against an ordered list of search directories
    fn resolve(
        &self,
        logical_name: &str,
        search_dirs: &[PathBuf],
        fallback: FallbackPolicy,
    ) -> Result<Resolved, PathError>;

    /// Whether `pattern` names something below `base`.
    ///
    /// Glob wildcards are honoured in `pattern` only; `base` is always
    /// taken literally. An absolute `pattern` ignores `base`.
    fn exists(&self, base: &Path, pattern: &str) -> Result<bool, PathError>;
}

/// Local filesystem resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPathResolver;

impl PathResolver for FsPathResolver {
    fn resolve(
        &self,
        logical_name: &str,
        search_dirs: &[PathBuf],
        fallback: FallbackPolicy,
    ) -> Result<Resolved, PathError> {
        let direct = Path::new(logical_name);
        if direct.is_absolute() && direct.exists() {
            return Ok(Resolved::Found(direct.to_path_buf()));
        }

        for dir in search_dirs {
            let candidate = dir.join(logical_name);
            if candidate.exists() {
                trace!(name = logical_name, path = %candidate.display(), "resolved directly");
                return Ok(Resolved::Found(candidate));
            }
        }

        // Bare file names may live anywhere below a search directory
        if direct.components().count() == 1 {
            for dir in search_dirs {
                let hit = WalkDir::new(dir)
                    .max_depth(SEARCH_DEPTH)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .find(|e| e.file_type().is_file() && e.file_name() == logical_name);
                if let Some(entry) = hit {
                    debug!(name = logical_name, path = %entry.path().display(), "resolved by search");
                    return Ok(Resolved::Found(entry.into_path()));
                }
            }
        }

        match fallback {
            FallbackPolicy::Strict => Err(PathError::NotFound {
                name: logical_name.to_string(),
                searched: search_dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            FallbackPolicy::Construct => {
                let base = search_dirs.first().cloned().unwrap_or_default();
                debug!(name = logical_name, "not found, constructing path");
                Ok(Resolved::Constructed(base.join(logical_name)))
            }
        }
    }

    fn exists(&self, base: &Path, pattern: &str) -> Result<bool, PathError> {
        if base.join(pattern).exists() {
            return Ok(true);
        }
        if !pattern.contains(['*', '?', '[']) {
            return Ok(false);
        }

        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            let base = glob::Pattern::escape(&base.to_string_lossy());
            Path::new(&base).join(pattern).to_string_lossy().into_owned()
        };
        let mut matches = glob::glob(&full).map_err(|e| PathError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(matches.any(|entry| entry.is_ok()))
    }
}

/// Create a directory (and parents) if missing, returning it
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let path = path.as_ref();
    if !path.is_dir() {
        debug!(path = %path.display(), "creating directory");
        std::fs::create_dir_all(path).map_err(|source| PathError::CreateDir {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(path.to_path_buf())
}

/// Absolute directory roots of one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDirs {
    pub root: PathBuf,
    pub input: PathBuf,
    pub intermediate: PathBuf,
    pub output: PathBuf,
    /// Extra search directories from `[paths] search`
    pub extra: Vec<PathBuf>,
}

impl ProjectDirs {
    pub fn new(root: impl Into<PathBuf>, dirs: &DirectoryConfig, paths: &PathsConfig) -> Self {
        let root = root.into();
        Self {
            input: root.join(&dirs.input),
            intermediate: root.join(&dirs.intermediate),
            output: root.join(&dirs.output),
            extra: paths.search.iter().map(|s| root.join(s)).collect(),
            root,
        }
    }

    /// Create the three roots
    pub fn ensure(&self) -> Result<(), PathError> {
        ensure_dir(&self.input)?;
        ensure_dir(&self.intermediate)?;
        ensure_dir(&self.output)?;
        Ok(())
    }

    /// Default search order: intermediate, input, output, then extras
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.intermediate.clone(),
            self.input.clone(),
            self.output.clone(),
        ];
        dirs.extend(self.extra.iter().cloned());
        dirs
    }
}
