//! Loading build descriptions from disk into raw in-memory trees.
//!
//! Files are memoized by normalized absolute path and loaded exactly
//! once. Loading a file splices its forced includes and `includes`
//! directives, runs the early expression phase over the result, and
//! then chases `dependencies` references into other files until the
//! transitive closure is loaded.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::debug;

use crate::expand::{self, ExpandContext, ExpandError, Phase};
use crate::merge::{self, MergeError};
use crate::paths::{self, DEFAULT_TOOLSET, TargetIdError};
use crate::value::{Dict, ParseError, Value, parse_dict};
use crate::world::World;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{file}: {source}")]
    Io {
        file: PathBuf,
        source: std::io::Error,
    },

    #[error("{file}: {source}")]
    Parse { file: PathBuf, source: ParseError },

    #[error("{file}: include cycle through {include}")]
    IncludeCycle { file: PathBuf, include: PathBuf },

    #[error("{file}: while merging includes: {source}")]
    Merge { file: PathBuf, source: MergeError },

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error("{file}: targets entry {index} is not a dict")]
    MalformedTarget { file: PathBuf, index: usize },

    #[error("{file}: bad dependency reference: {source}")]
    Dependency {
        file: PathBuf,
        source: TargetIdError,
    },
}

/// A loaded build description.
#[derive(Debug, Clone)]
pub struct BuildFile {
    /// Normalized absolute path; the file's identity.
    pub path: PathBuf,
    /// Top-level sections after include splicing and early expansion.
    pub data: Dict,
    /// Every file spliced into this one, for rebuild tracking.
    pub included_files: Vec<PathBuf>,
}

pub struct LoadOptions<'a> {
    /// `-D` defines plus the generator's default variables.
    pub default_variables: &'a Dict,
    /// `-I` files, prepended to every loaded build description.
    pub forced_includes: &'a [PathBuf],
    /// The source-root anchor; provides the `DEPTH` variable.
    pub depth: &'a Path,
}

/// Load `entries` and every build file they reference, returning the
/// table of loaded files in load order.
#[tracing::instrument(skip_all)]
pub fn load_files(
    world: &dyn World,
    entries: &[PathBuf],
    opts: &LoadOptions<'_>,
) -> Result<IndexMap<PathBuf, BuildFile>, LoadError> {
    let mut loader = Loader {
        world,
        opts,
        files: IndexMap::new(),
    };
    for entry in entries {
        loader.load(entry)?;
    }
    Ok(loader.files)
}

struct Loader<'a> {
    world: &'a dyn World,
    opts: &'a LoadOptions<'a>,
    files: IndexMap<PathBuf, BuildFile>,
}

impl Loader<'_> {
    fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        let path = paths::normalize(path);
        if self.files.contains_key(&path) {
            return Ok(());
        }
        debug!(file = %path.display(), "loading build file");

        let mut included_files = Vec::new();
        let mut data = Dict::new();
        for include in self.opts.forced_includes {
            let mut stack = Vec::new();
            let include_data =
                self.load_include(include, &path, &mut included_files, &mut stack)?;
            merge::merge_dict(&mut data, &include_data, "").map_err(|source| {
                LoadError::Merge {
                    file: path.clone(),
                    source,
                }
            })?;
        }

        let text = self
            .world
            .read_to_string(&path)
            .map_err(|source| LoadError::Io {
                file: path.clone(),
                source,
            })?;
        let mut own = parse_dict(&text).map_err(|source| LoadError::Parse {
            file: path.clone(),
            source,
        })?;
        self.splice_includes(&mut own, &path, &path, &mut included_files)?;
        merge::merge_dict(&mut data, &own, "").map_err(|source| LoadError::Merge {
            file: path.clone(),
            source,
        })?;

        // Early expression phase: simple variables and `conditions`.
        let base_dir = path.parent().unwrap_or(Path::new("/")).to_path_buf();
        let mut scope = self.opts.default_variables.clone();
        scope.insert(
            "DEPTH".to_owned(),
            Value::Str(paths::to_unix(&paths::relative_path(
                self.opts.depth,
                &base_dir,
            ))),
        );
        let cx = ExpandContext {
            world: self.world,
            file: &path,
            base_dir: &base_dir,
            phase: Phase::Early,
        };
        expand::evaluate(&mut data, &scope, &cx)?;

        // Memoize before chasing references so reference cycles between
        // files terminate; target-graph cycles are diagnosed later.
        self.files.insert(
            path.clone(),
            BuildFile {
                path: path.clone(),
                data: data.clone(),
                included_files,
            },
        );

        for referenced in self.referenced_files(&data, &path)? {
            self.load(&referenced)?;
        }
        Ok(())
    }

    /// Replace a file's `includes` directive by its contents, depth
    /// first, with the including file winning on scalar conflicts.
    fn splice_includes(
        &mut self,
        own: &mut Dict,
        file: &Path,
        origin: &Path,
        included_files: &mut Vec<PathBuf>,
    ) -> Result<(), LoadError> {
        let Some(includes) = own.shift_remove("includes") else {
            return Ok(());
        };
        let mut merged = Dict::new();
        let dir = file.parent().unwrap_or(Path::new("/"));
        for include in includes.string_list().unwrap_or_default() {
            let include_path = paths::normalize(&dir.join(include));
            let mut stack = Vec::new();
            let include_data =
                self.load_include(&include_path, origin, included_files, &mut stack)?;
            merge::merge_dict(&mut merged, &include_data, "").map_err(|source| {
                LoadError::Merge {
                    file: origin.to_path_buf(),
                    source,
                }
            })?;
        }
        merge::merge_dict(&mut merged, own, "").map_err(|source| LoadError::Merge {
            file: origin.to_path_buf(),
            source,
        })?;
        *own = merged;
        Ok(())
    }

    fn load_include(
        &mut self,
        path: &Path,
        origin: &Path,
        included_files: &mut Vec<PathBuf>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Dict, LoadError> {
        let path = paths::normalize(path);
        if stack.contains(&path) {
            return Err(LoadError::IncludeCycle {
                file: origin.to_path_buf(),
                include: path,
            });
        }
        stack.push(path.clone());

        let text = self
            .world
            .read_to_string(&path)
            .map_err(|source| LoadError::Io {
                file: path.clone(),
                source,
            })?;
        let mut data = parse_dict(&text).map_err(|source| LoadError::Parse {
            file: path.clone(),
            source,
        })?;
        if !included_files.contains(&path) {
            included_files.push(path.clone());
        }

        // Nested includes resolve relative to the include's own dir.
        if let Some(includes) = data.shift_remove("includes") {
            let mut merged = Dict::new();
            let dir = path.parent().unwrap_or(Path::new("/"));
            for include in includes.string_list().unwrap_or_default() {
                let nested = paths::normalize(&dir.join(include));
                let nested_data = self.load_include(&nested, origin, included_files, stack)?;
                merge::merge_dict(&mut merged, &nested_data, "").map_err(|source| {
                    LoadError::Merge {
                        file: origin.to_path_buf(),
                        source,
                    }
                })?;
            }
            merge::merge_dict(&mut merged, &data, "").map_err(|source| LoadError::Merge {
                file: origin.to_path_buf(),
                source,
            })?;
            data = merged;
        }

        stack.pop();
        Ok(data)
    }

    /// Build files referenced from this one through `dependencies`.
    fn referenced_files(&self, data: &Dict, file: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let mut out = Vec::new();
        let Some(targets) = data.get("targets").and_then(Value::as_list) else {
            return Ok(out);
        };
        for (index, target) in targets.iter().enumerate() {
            let target = target
                .as_dict()
                .ok_or_else(|| LoadError::MalformedTarget {
                    file: file.to_path_buf(),
                    index,
                })?;
            let toolset = target
                .get("toolset")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_TOOLSET);
            let Some(deps) = target.get("dependencies").and_then(Value::as_list) else {
                continue;
            };
            for dep in deps {
                let Some(dep) = dep.as_str() else { continue };
                let qualified = paths::parse_dependency(dep, file, toolset).map_err(|source| {
                    LoadError::Dependency {
                        file: file.to_path_buf(),
                        source,
                    }
                })?;
                if qualified.build_file != file && !self.files.contains_key(&qualified.build_file)
                {
                    out.push(qualified.build_file);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::CommandResult;
    use std::collections::HashMap;

    struct FileWorld {
        files: HashMap<PathBuf, String>,
    }

    impl FileWorld {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, c)| (PathBuf::from(p), (*c).to_owned()))
                    .collect(),
            }
        }
    }

    impl World for FileWorld {
        fn exists(&self, path: &Path) -> bool {
            self.files.contains_key(path)
        }
        fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
        fn write_file(&self, _path: &Path, _contents: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }
        fn run_command(&self, _cwd: &Path, _command: &str) -> std::io::Result<CommandResult> {
            Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
        }
    }

    fn load_one(world: &FileWorld, entry: &str) -> IndexMap<PathBuf, BuildFile> {
        let defaults = Dict::new();
        let opts = LoadOptions {
            default_variables: &defaults,
            forced_includes: &[],
            depth: Path::new("/src"),
        };
        load_files(world, &[PathBuf::from(entry)], &opts).unwrap()
    }

    #[test]
    fn loads_and_memoizes() {
        let world = FileWorld::new(&[(
            "/src/a.gyp",
            "{'targets': [{'target_name': 'a', 'type': 'none'}]}",
        )]);
        let defaults = Dict::new();
        let opts = LoadOptions {
            default_variables: &defaults,
            forced_includes: &[],
            depth: Path::new("/src"),
        };
        let files = load_files(
            &world,
            &[PathBuf::from("/src/a.gyp"), PathBuf::from("/src/./a.gyp")],
            &opts,
        )
        .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn loading_twice_yields_equal_trees() {
        let world = FileWorld::new(&[(
            "/src/a.gyp",
            "{'variables': {'n': 'x'}, 'targets': [{'target_name': '<(n)', 'type': 'none'}]}",
        )]);
        let first = load_one(&world, "/src/a.gyp");
        let second = load_one(&world, "/src/a.gyp");
        assert_eq!(first[&PathBuf::from("/src/a.gyp")].data, second[&PathBuf::from("/src/a.gyp")].data);
    }

    #[test]
    fn includes_splice_with_file_winning() {
        let world = FileWorld::new(&[
            (
                "/src/a.gyp",
                "{'includes': ['common.gypi'], 'variables': {'v': 'own'}, 'targets': []}",
            ),
            (
                "/src/common.gypi",
                "{'variables': {'v': 'included', 'extra': 1}}",
            ),
        ]);
        let files = load_one(&world, "/src/a.gyp");
        let data = &files[&PathBuf::from("/src/a.gyp")].data;
        let vars = data["variables"].as_dict().unwrap();
        assert_eq!(vars["v"], Value::from("own"));
        assert_eq!(vars["extra"], Value::Int(1));
        assert_eq!(
            files[&PathBuf::from("/src/a.gyp")].included_files,
            vec![PathBuf::from("/src/common.gypi")]
        );
    }

    #[test]
    fn nested_includes_resolve_relative_to_their_file() {
        let world = FileWorld::new(&[
            ("/src/a.gyp", "{'includes': ['sub/one.gypi']}"),
            ("/src/sub/one.gypi", "{'includes': ['two.gypi'], 'a': 1}"),
            ("/src/sub/two.gypi", "{'b': 2}"),
        ]);
        let files = load_one(&world, "/src/a.gyp");
        let data = &files[&PathBuf::from("/src/a.gyp")].data;
        assert_eq!(data["a"], Value::Int(1));
        assert_eq!(data["b"], Value::Int(2));
    }

    #[test]
    fn include_cycle_is_fatal() {
        let world = FileWorld::new(&[
            ("/src/a.gyp", "{'includes': ['x.gypi']}"),
            ("/src/x.gypi", "{'includes': ['y.gypi']}"),
            ("/src/y.gypi", "{'includes': ['x.gypi']}"),
        ]);
        let defaults = Dict::new();
        let opts = LoadOptions {
            default_variables: &defaults,
            forced_includes: &[],
            depth: Path::new("/src"),
        };
        let err = load_files(&world, &[PathBuf::from("/src/a.gyp")], &opts).unwrap_err();
        assert!(matches!(err, LoadError::IncludeCycle { .. }));
    }

    #[test]
    fn follows_cross_file_dependencies() {
        let world = FileWorld::new(&[
            (
                "/src/a/a.gyp",
                "{'targets': [{'target_name': 'A', 'type': 'executable',
                               'dependencies': ['../b/b.gyp:B']}]}",
            ),
            (
                "/src/b/b.gyp",
                "{'targets': [{'target_name': 'B', 'type': 'static_library'}]}",
            ),
        ]);
        let files = load_one(&world, "/src/a/a.gyp");
        assert!(files.contains_key(&PathBuf::from("/src/b/b.gyp")));
    }

    #[test]
    fn depth_variable_is_available() {
        let world = FileWorld::new(&[(
            "/src/sub/a.gyp",
            "{'variables': {'root': '<(DEPTH)'}, 'v': '<(root)'}",
        )]);
        let files = load_one(&world, "/src/sub/a.gyp");
        let data = &files[&PathBuf::from("/src/sub/a.gyp")].data;
        assert_eq!(data["v"], Value::from(".."));
    }

    #[test]
    fn conditions_can_add_dependencies_on_other_files() {
        let world = FileWorld::new(&[
            (
                "/src/a.gyp",
                "{'targets': [{'target_name': 'A', 'type': 'none',
                               'conditions': [['pull==1', {'dependencies': ['b.gyp:B']}]]}]}",
            ),
            (
                "/src/b.gyp",
                "{'targets': [{'target_name': 'B', 'type': 'none'}]}",
            ),
        ]);
        let mut defaults = Dict::new();
        defaults.insert("pull".to_owned(), Value::Int(1));
        let opts = LoadOptions {
            default_variables: &defaults,
            forced_includes: &[],
            depth: Path::new("/src"),
        };
        let files = load_files(&world, &[PathBuf::from("/src/a.gyp")], &opts).unwrap();
        assert!(files.contains_key(&PathBuf::from("/src/b.gyp")));
    }
}
