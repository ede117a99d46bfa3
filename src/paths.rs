//! Qualified target identifiers and lexical path arithmetic.
//!
//! A target is identified by the triple (build file, target name, toolset),
//! rendered as `file:target#toolset`. All path math here is lexical; the
//! generator never consults the filesystem to resolve a path.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use smol_str::SmolStr;

pub const DEFAULT_TOOLSET: &str = "target";

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum TargetIdError {
    #[error("dependency reference {0:?} has an empty target name")]
    EmptyTarget(String),

    #[error("dependency reference {0:?} has an empty toolset")]
    EmptyToolset(String),
}

/// The unique identity of a target: `(file, name, toolset)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedTarget {
    pub build_file: PathBuf,
    pub name: SmolStr,
    pub toolset: SmolStr,
}

impl QualifiedTarget {
    pub fn new(build_file: impl Into<PathBuf>, name: &str, toolset: &str) -> Self {
        Self {
            build_file: build_file.into(),
            name: name.into(),
            toolset: toolset.into(),
        }
    }
}

impl fmt::Display for QualifiedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}",
            self.build_file.display(),
            self.name,
            self.toolset
        )
    }
}

/// Parse a dependency reference as written in a build description.
///
/// Accepted forms, relative to the referencing build file:
///
/// - `name` — a target in the same file;
/// - `path/to/other.gyp:name` — a target in another file;
/// - either of the above followed by `#toolset`.
///
/// A reference without an explicit toolset inherits `default_toolset`
/// (the referencing target's own toolset).
pub fn parse_dependency(
    reference: &str,
    referencing_file: &Path,
    default_toolset: &str,
) -> Result<QualifiedTarget, TargetIdError> {
    let (spec, toolset) = match reference.rsplit_once('#') {
        Some((spec, toolset)) => {
            if toolset.is_empty() {
                return Err(TargetIdError::EmptyToolset(reference.to_owned()));
            }
            (spec, toolset)
        }
        None => (reference, default_toolset),
    };

    let (file_part, name) = match spec.rsplit_once(':') {
        Some((file, name)) => (file, name),
        None => ("", spec),
    };
    if name.is_empty() {
        return Err(TargetIdError::EmptyTarget(reference.to_owned()));
    }

    let build_file = if file_part.is_empty() {
        referencing_file.to_path_buf()
    } else {
        let dir = referencing_file.parent().unwrap_or(Path::new(""));
        normalize(&dir.join(file_part))
    };

    Ok(QualifiedTarget::new(build_file, name, toolset))
}

/// Lexically normalize a path: collapse `.`, `//`, and inner `..`
/// components. Leading `..` components are preserved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// The path of `path` as seen from `relative_to`. Both are interpreted
/// against the same (unspecified) root, so mixing absolute and relative
/// inputs is the caller's responsibility.
pub fn relative_path(path: &Path, relative_to: &Path) -> PathBuf {
    let path = normalize(path);
    let base = normalize(relative_to);
    if path == base {
        return PathBuf::from(".");
    }

    let path_comps: Vec<Component<'_>> = path.components().collect();
    let base_comps: Vec<Component<'_>> = base.components().collect();
    let common = path_comps
        .iter()
        .zip(base_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_comps.len() {
        out.push("..");
    }
    for comp in &path_comps[common..] {
        out.push(comp);
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Given a relative path like `foo/bar`, return the inverse relative
/// path: joining the two and normalizing yields the empty path.
pub fn invert_relative_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        return String::new();
    }
    let depth = path.split('/').filter(|c| !c.is_empty() && *c != ".").count();
    vec![".."; depth].join("/")
}

/// Forward-slash rendering of a path for emitted build files.
pub fn to_unix(path: &Path) -> String {
    let mut out = String::new();
    for comp in path.components() {
        let part = match comp {
            Component::RootDir => {
                out.push('/');
                continue;
            }
            other => other.as_os_str().to_string_lossy(),
        };
        if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(&part);
    }
    if out.is_empty() { ".".to_owned() } else { out }
}
