//! Back-end emitters.
//!
//! The resolver's output is handed to exactly one emitter per run,
//! selected by [`Format`]. Everything an emitter may consult lives in
//! [`GeneratorContext`]; emitters never mutate the resolved graph.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};

use crate::graph::TargetGraph;
use crate::load::BuildFile;
use crate::paths::{self, QualifiedTarget};
use crate::value::{Dict, Value};
use crate::world::World;

pub mod make;
pub mod ninja;
pub mod ninja_syntax;
pub mod scons;

/// The downstream build driver to emit for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Make,
    Ninja,
    Scons,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Make => "make",
            Format::Ninja => "ninja",
            Format::Scons => "scons",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown format {0:?} (expected make, ninja, or scons)")]
pub struct UnknownFormat(pub String);

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "make" => Ok(Format::Make),
            "ninja" => Ok(Format::Ninja),
            "scons" => Ok(Format::Scons),
            other => Err(UnknownFormat(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{target}: path {path:?} contains a space and cannot enter a build edge")]
    SpaceInPath { target: QualifiedTarget, path: String },
}

/// `-G KEY=VAL` flags, generator-specific by convention.
#[derive(Debug, Clone, Default)]
pub struct GeneratorFlags(IndexMap<String, String>);

impl GeneratorFlags {
    /// Parse `KEY=VAL` pairs; a bare `KEY` means `1`.
    pub fn parse(pairs: &[String]) -> Self {
        let mut map = IndexMap::new();
        for pair in pairs {
            match pair.split_once('=') {
                Some((key, value)) => map.insert(key.to_owned(), value.to_owned()),
                None => map.insert(pair.clone(), "1".to_owned()),
            };
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => v != "0" && !v.is_empty(),
            None => default,
        }
    }
}

/// Options shared by every emitter, from the command line.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Absolute source-root anchor (`--depth`).
    pub depth: PathBuf,
    /// Suffix appended to generated file names (`-S`).
    pub suffix: String,
    /// Redirects generated files under this directory.
    pub generator_output: Option<PathBuf>,
}

/// Everything an emitter reads. Replaces the module-level mutable maps
/// of older generators of this kind; the graph and tables are frozen by
/// the time this is constructed.
pub struct GeneratorContext<'a> {
    pub world: &'a dyn World,
    pub options: &'a GeneratorOptions,
    pub flags: &'a GeneratorFlags,
    pub graph: &'a TargetGraph,
    pub build_files: &'a IndexMap<PathBuf, BuildFile>,
    /// The entry build files named on the command line, absolute.
    pub entry_files: &'a [PathBuf],
    /// Arguments that reproduce this run, minus the format selection.
    /// Used by the regeneration rule.
    pub regen_args: &'a [String],
}

impl GeneratorContext<'_> {
    /// Build-file path relative to the source root, forward slashes.
    pub fn rel_build_file(&self, q: &QualifiedTarget) -> String {
        paths::to_unix(&paths::relative_path(&q.build_file, &self.options.depth))
    }

    /// Directory of a target's build file relative to the source root;
    /// empty for the root itself.
    pub fn base_path(&self, q: &QualifiedTarget) -> String {
        let rel = self.rel_build_file(q);
        match rel.rsplit_once('/') {
            Some((dir, _)) => dir.to_owned(),
            None => String::new(),
        }
    }

    /// Where a generated file for the source-root-relative `rel` lands
    /// on disk, honoring `--generator-output`.
    pub fn output_path(&self, rel: &str) -> PathBuf {
        let root = match &self.options.generator_output {
            Some(dir) => dir.clone(),
            None => self.options.depth.clone(),
        };
        paths::normalize(&root.join(rel))
    }

    /// The configuration the build defaults to: the first target that
    /// names one explicitly, else `Default`.
    pub fn default_configuration(&self) -> String {
        for q in &self.graph.flat_list {
            let target = &self.graph.targets[q];
            if target.default_configuration != "Default" {
                return target.default_configuration.clone();
            }
        }
        "Default".to_owned()
    }

    /// Targets reachable from the entry build files; these belong to
    /// the `all` aggregate.
    pub fn needed_targets(&self) -> IndexSet<QualifiedTarget> {
        let mut needed = IndexSet::new();
        let mut stack: Vec<QualifiedTarget> = Vec::new();
        for q in &self.graph.flat_list {
            if self.entry_files.contains(&q.build_file) {
                stack.push(q.clone());
            }
        }
        while let Some(q) = stack.pop() {
            if !needed.insert(q.clone()) {
                continue;
            }
            if let Some(target) = self.graph.target(&q) {
                stack.extend(target.dependencies.iter().cloned());
            }
        }
        needed
    }

    pub fn write_file(&self, path: &Path, contents: &str) -> Result<(), EmitError> {
        self.world
            .write_file(path, contents)
            .map_err(|source| EmitError::Io {
                path: path.to_owned(),
                source,
            })
    }
}

/// Dispatch to the selected backend.
pub fn generate(format: Format, ctx: &GeneratorContext<'_>) -> Result<(), EmitError> {
    match format {
        Format::Make => make::generate(ctx),
        Format::Ninja => ninja::generate(ctx),
        Format::Scons => scons::generate(ctx),
    }
}

/// Variables each backend guarantees to the build descriptions, merged
/// into the default variable set before loading.
pub fn generator_default_variables(format: Format) -> Dict {
    let pairs: &[(&str, &str)] = match format {
        Format::Make => &[
            ("OS", "linux"),
            ("EXECUTABLE_PREFIX", ""),
            ("EXECUTABLE_SUFFIX", ""),
            ("STATIC_LIB_PREFIX", "lib"),
            ("STATIC_LIB_SUFFIX", ".a"),
            ("SHARED_LIB_PREFIX", "lib"),
            ("SHARED_LIB_SUFFIX", ".so"),
            ("SHARED_LIB_DIR", "$(builddir)/lib.$(TOOLSET)"),
            ("LIB_DIR", "$(obj).$(TOOLSET)"),
            ("INTERMEDIATE_DIR", "$(obj).$(TOOLSET)/geni"),
            ("SHARED_INTERMEDIATE_DIR", "$(obj)/gen"),
            ("PRODUCT_DIR", "$(builddir)"),
            ("RULE_INPUT_ROOT", "%(INPUT_ROOT)s"),
            ("RULE_INPUT_PATH", "$(abspath $<)"),
            ("RULE_INPUT_EXT", "$(suffix $<)"),
            ("RULE_INPUT_NAME", "$(notdir $<)"),
            ("CONFIGURATION_NAME", "$(BUILDTYPE)"),
        ],
        Format::Ninja => &[
            ("OS", "linux"),
            ("EXECUTABLE_PREFIX", ""),
            ("EXECUTABLE_SUFFIX", ""),
            ("STATIC_LIB_PREFIX", "lib"),
            ("STATIC_LIB_SUFFIX", ".a"),
            ("SHARED_LIB_PREFIX", "lib"),
            ("SHARED_LIB_SUFFIX", ".so"),
            ("INTERMEDIATE_DIR", "$!INTERMEDIATE_DIR"),
            ("SHARED_INTERMEDIATE_DIR", "$!PRODUCT_DIR/gen"),
            ("PRODUCT_DIR", "$!PRODUCT_DIR"),
            ("SHARED_LIB_DIR", "$!PRODUCT_DIR/lib"),
            ("LIB_DIR", ""),
            ("RULE_INPUT_ROOT", "$root"),
            ("RULE_INPUT_PATH", "$source"),
            ("RULE_INPUT_EXT", "$ext"),
            ("RULE_INPUT_NAME", "$name"),
        ],
        Format::Scons => &[
            ("OS", "linux"),
            ("EXECUTABLE_PREFIX", ""),
            ("EXECUTABLE_SUFFIX", ""),
            ("STATIC_LIB_PREFIX", "lib"),
            ("STATIC_LIB_SUFFIX", ".a"),
            ("SHARED_LIB_PREFIX", "lib"),
            ("SHARED_LIB_SUFFIX", ".so"),
            ("INTERMEDIATE_DIR", "$OBJ_DIR/$COMPONENT_NAME/$TARGET_NAME/intermediate"),
            ("SHARED_INTERMEDIATE_DIR", "$OBJ_DIR/global_intermediate"),
            ("PRODUCT_DIR", "$DESTINATION_ROOT"),
            ("RULE_INPUT_ROOT", "${SOURCE.filebase}"),
            ("RULE_INPUT_PATH", "${SOURCE}"),
            ("RULE_INPUT_EXT", "${SOURCE.suffix}"),
            ("RULE_INPUT_NAME", "${SOURCE.file}"),
        ],
    };
    let mut dict = Dict::new();
    for (key, value) in pairs {
        dict.insert((*key).to_owned(), Value::from(*value));
    }
    dict
}

/// Quote one word for a POSIX shell. Single quotes keep the shell away
/// from the contents while still letting make and ninja substitute
/// their own `$`-variables before the shell ever runs.
pub(crate) fn encode_shell_argument(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_=.,/-".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Quote a tokenized command for a POSIX shell, quoting only arguments
/// that need it.
pub(crate) fn encode_shell_list(args: &[String]) -> String {
    args.iter()
        .map(|a| encode_shell_argument(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The strict space policy: any path written into a build edge must be
/// space free.
pub(crate) fn check_path(target: &QualifiedTarget, path: &str) -> Result<(), EmitError> {
    if path.contains(' ') {
        return Err(EmitError::SpaceInPath {
            target: target.clone(),
            path: path.to_owned(),
        });
    }
    Ok(())
}

/// Map a source file extension to the compile flavor, shared by the
/// make and ninja backends. Unknown extensions are skipped with a
/// warning at the call sites.
pub(crate) fn compile_flavor(source: &str) -> Option<&'static str> {
    let ext = source.rsplit_once('.').map(|(_, e)| e)?;
    match ext {
        "c" | "s" | "S" => Some("cc"),
        "cc" | "cpp" | "cxx" => Some("cxx"),
        _ => None,
    }
}
