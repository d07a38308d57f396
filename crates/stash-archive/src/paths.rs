//! Path pattern expansion.

use directories::BaseDirs;
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use stash_core::{Error, PathSet, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

fn looks_like_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('{') || pattern.contains('?') || pattern.contains('[')
}

fn compile(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::InvalidInput(format!("Invalid glob pattern '{}': {}", pattern, e)))
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_home_relative(pattern: &str) -> bool {
    pattern == "~" || pattern.starts_with("~/")
}

fn home_dir(pattern: &str) -> Result<PathBuf> {
    let dirs = BaseDirs::new().ok_or_else(|| {
        Error::InvalidInput(format!("Cannot expand '{}': no home directory", pattern))
    })?;
    Ok(dirs.home_dir().to_path_buf())
}

/// Anchor a glob at the working directory or the home directory.
fn absolute_pattern(pattern: &str, base_dir: &Path) -> Result<String> {
    if is_home_relative(pattern) {
        let home = globset::escape(&home_dir(pattern)?.to_string_lossy());
        return Ok(format!("{}{}", home, &pattern[1..]));
    }
    if Path::new(pattern).is_absolute() {
        return Ok(pattern.to_string());
    }
    let base = globset::escape(&base_dir.to_string_lossy());
    Ok(format!("{}/{}", base.trim_end_matches('/'), pattern))
}

/// Resolve a pattern without wildcards to the path it names.
fn literal_path(pattern: &str, base_dir: &Path) -> Result<PathBuf> {
    if is_home_relative(pattern) {
        return Ok(home_dir(pattern)?.join(pattern[1..].trim_start_matches('/')));
    }
    Ok(base_dir.join(pattern))
}

/// The longest literal directory prefix of an absolute glob.
fn glob_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    if pattern.starts_with('/') {
        root.push("/");
    }
    for part in pattern.split('/') {
        if looks_like_glob(part) {
            break;
        }
        if !part.is_empty() {
            root.push(part);
        }
    }
    root
}

struct Exclusions {
    set: GlobSet,
    active: bool,
}

impl Exclusions {
    fn is_match(&self, path: &Path) -> bool {
        self.active && self.set.is_match(path)
    }

    /// Record a match. With exclusions in play a directory is replaced by its
    /// surviving descendants, since archiving it whole would bring excluded entries back.
    fn push(&self, path: &Path, is_dir: bool, found: &mut Vec<PathBuf>) {
        if !is_dir || !self.active {
            found.push(normalize(path));
            return;
        }
        let walker = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_match(e.path()));
        for entry in walker {
            match entry {
                Ok(entry) if !entry.file_type().is_dir() => found.push(normalize(entry.path())),
                Ok(_) => {}
                Err(err) => tracing::debug!(error = %err, "Skipping unreadable path"),
            }
        }
    }
}

fn expand_glob(pattern: &str, exclusions: &Exclusions, found: &mut Vec<PathBuf>) -> Result<()> {
    let matcher: GlobMatcher = compile(pattern)?.compile_matcher();
    let root = glob_root(pattern);
    if !root.exists() {
        tracing::debug!(root = %root.display(), "Glob root does not exist, skipping");
        return Ok(());
    }

    let mut walker = WalkDir::new(&root).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping unreadable path");
                continue;
            }
        };
        let is_dir = entry.file_type().is_dir();
        if exclusions.is_match(entry.path()) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if matcher.is_match(entry.path()) {
            exclusions.push(entry.path(), is_dir, found);
            if is_dir {
                walker.skip_current_dir();
            }
        }
    }
    Ok(())
}

/// Drop duplicates and entries already covered by an included directory.
fn prune(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    let mut kept: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for path in paths {
        if kept.last().is_some_and(|last| path.starts_with(last)) {
            continue;
        }
        kept.push(path);
    }
    kept
}

/// Expand path patterns into the concrete entries to archive.
///
/// Relative patterns resolve against `base_dir`, `~/` against the home
/// directory, and `!pattern` removes matches. Returns absolute, sorted paths;
/// a matched directory stands for its whole subtree. Patterns that match
/// nothing are not an error.
pub fn expand_paths(paths: &PathSet, base_dir: &Path) -> Result<Vec<PathBuf>> {
    let base_dir = normalize(&std::path::absolute(base_dir)?);

    let mut includes = Vec::new();
    let mut excludes = GlobSetBuilder::new();
    let mut active = false;
    for pattern in paths.patterns() {
        match pattern.strip_prefix('!') {
            Some(negated) => {
                excludes.add(compile(&absolute_pattern(negated.trim(), &base_dir)?)?);
                active = true;
            }
            None => includes.push(pattern.as_str()),
        }
    }
    let exclusions = Exclusions {
        set: excludes
            .build()
            .map_err(|e| Error::InvalidInput(format!("Invalid exclusion patterns: {}", e)))?,
        active,
    };

    let mut found = Vec::new();
    for pattern in includes {
        if looks_like_glob(pattern) {
            expand_glob(&absolute_pattern(pattern, &base_dir)?, &exclusions, &mut found)?;
            continue;
        }
        let path = normalize(&literal_path(pattern, &base_dir)?);
        if exclusions.is_match(&path) {
            continue;
        }
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) => exclusions.push(&path, metadata.is_dir(), &mut found),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Path does not exist, skipping");
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }

    let expanded = prune(found);
    tracing::debug!(patterns = paths.patterns().len(), entries = expanded.len(), "Expanded paths");
    Ok(expanded)
}
