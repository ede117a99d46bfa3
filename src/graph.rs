//! Target graph resolution.
//!
//! Takes the loaded build files and produces the frozen target set: one
//! entry per `(file, name, toolset)`, with dependencies canonicalized,
//! the graph checked for cycles, a deterministic topological
//! `flat_list`, dependent settings propagated, and the static-library
//! link closure folded into each linking target's dependencies.

use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};
use petgraph::prelude::DiGraphMap;
use tracing::debug;

use crate::expand::{self, ExpandContext, ExpandError, Phase};
use crate::load::BuildFile;
use crate::merge::{self, MergeError};
use crate::paths::{self, QualifiedTarget, TargetIdError};
use crate::spec::{SpecError, Target, TargetType};
use crate::value::{Dict, Value};
use crate::world::World;

/// A dense index for one target; identifies a node in the dependency
/// graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(usize);

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("{file}: targets entry {index} is not a dict")]
    MalformedTarget { file: PathBuf, index: usize },

    #[error("{file}: targets entry {index} has no target_name")]
    MissingTargetName { file: PathBuf, index: usize },

    #[error("duplicate target {0}")]
    DuplicateTarget(QualifiedTarget),

    #[error("{from}: dependency {reference:?} does not resolve to any target")]
    UnresolvedDependency {
        from: QualifiedTarget,
        reference: String,
    },

    #[error("{from}: bad dependency reference: {source}")]
    Dependency {
        from: QualifiedTarget,
        source: TargetIdError,
    },

    #[error("cycle in target dependency graph: {}", format_chain(chain))]
    Cycle { chain: Vec<QualifiedTarget> },

    #[error("{target}: {source}")]
    Merge {
        target: QualifiedTarget,
        source: MergeError,
    },

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error(transparent)]
    Spec(#[from] SpecError),
}

fn format_chain(chain: &[QualifiedTarget]) -> String {
    chain
        .iter()
        .map(|q| q.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The resolved, frozen target set. Written once here, read-only for
/// the emitters.
#[derive(Debug)]
pub struct TargetGraph {
    /// Frozen targets in declaration order.
    pub targets: IndexMap<QualifiedTarget, Target>,
    /// Topological order: every target precedes its dependents.
    pub flat_list: Vec<QualifiedTarget>,
}

impl TargetGraph {
    pub fn target(&self, q: &QualifiedTarget) -> Option<&Target> {
        self.targets.get(q)
    }
}

/// Resolve the loaded files into a [`TargetGraph`].
#[tracing::instrument(skip_all)]
pub fn resolve(
    files: &IndexMap<PathBuf, BuildFile>,
    default_variables: &Dict,
    depth: &std::path::Path,
    world: &dyn World,
) -> Result<TargetGraph, GraphError> {
    let mut dicts = collect_targets(files)?;

    // The expression engine must be fully spent before any graph work:
    // a target_conditions branch can add dependencies, and those edges
    // have to be qualified, cycle-checked, ordered, and propagated
    // like any declared one.
    let collected: Vec<QualifiedTarget> = dicts.keys().cloned().collect();
    for q in &collected {
        finish_target(q, &mut dicts, default_variables, depth, world)?;
    }

    let mut deps = qualify_dependencies(&mut dicts)?;
    detect_cycles(&dicts, &deps)?;
    let flat_list = flatten(&dicts, &deps);
    debug!(targets = flat_list.len(), "flattened target graph");

    let types = target_types(&dicts);
    // Dependent settings see the user-declared edges; the link-closure
    // rewrite below adds shortcut edges that must not widen them.
    propagate_settings(&flat_list, &mut dicts, &deps, &types)?;
    rewrite_link_dependencies(&mut dicts, &mut deps, &types);

    let mut targets = IndexMap::new();
    for (q, dict) in &dicts {
        targets.insert(q.clone(), Target::from_dict(q.clone(), dict)?);
    }
    Ok(TargetGraph { targets, flat_list })
}

fn collect_targets(
    files: &IndexMap<PathBuf, BuildFile>,
) -> Result<IndexMap<QualifiedTarget, Dict>, GraphError> {
    let mut dicts = IndexMap::new();
    for (path, build_file) in files {
        let defaults = build_file
            .data
            .get("target_defaults")
            .and_then(Value::as_dict)
            .cloned();
        let Some(list) = build_file.data.get("targets").and_then(Value::as_list) else {
            continue;
        };
        for (index, entry) in list.iter().enumerate() {
            let mut dict = entry
                .as_dict()
                .cloned()
                .ok_or_else(|| GraphError::MalformedTarget {
                    file: path.clone(),
                    index,
                })?;
            let name = dict
                .get("target_name")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| GraphError::MissingTargetName {
                    file: path.clone(),
                    index,
                })?;
            let toolset = dict
                .get("toolset")
                .and_then(Value::as_str)
                .unwrap_or(paths::DEFAULT_TOOLSET)
                .to_owned();
            let qualified = QualifiedTarget::new(path.clone(), &name, &toolset);

            if let Some(defaults) = &defaults {
                merge::apply_target_defaults(&mut dict, defaults, "targets").map_err(
                    |source| GraphError::Merge {
                        target: qualified.clone(),
                        source,
                    },
                )?;
            }
            if dicts.insert(qualified.clone(), dict).is_some() {
                return Err(GraphError::DuplicateTarget(qualified));
            }
        }
    }
    Ok(dicts)
}

/// Canonicalize every `dependencies` entry to `file:target#toolset`,
/// preserving the declared list as `dependencies_original`. An edge
/// carries the dependent's toolset unless overridden.
fn qualify_dependencies(
    dicts: &mut IndexMap<QualifiedTarget, Dict>,
) -> Result<IndexMap<QualifiedTarget, Vec<QualifiedTarget>>, GraphError> {
    let known: IndexSet<QualifiedTarget> = dicts.keys().cloned().collect();
    let mut deps_table = IndexMap::new();

    for (q, dict) in dicts.iter_mut() {
        let raw = dict
            .get("dependencies")
            .and_then(Value::string_list)
            .unwrap_or_default();
        let mut qualified = Vec::new();
        for reference in &raw {
            let dep = paths::parse_dependency(reference, &q.build_file, &q.toolset).map_err(
                |source| GraphError::Dependency {
                    from: q.clone(),
                    source,
                },
            )?;
            if !known.contains(&dep) {
                return Err(GraphError::UnresolvedDependency {
                    from: q.clone(),
                    reference: reference.clone(),
                });
            }
            if !qualified.contains(&dep) {
                qualified.push(dep);
            }
        }
        if !raw.is_empty() {
            dict.insert(
                "dependencies_original".to_owned(),
                Value::List(raw.iter().map(|s| Value::from(s.as_str())).collect()),
            );
            dict.insert(
                "dependencies".to_owned(),
                Value::List(
                    qualified
                        .iter()
                        .map(|d| Value::Str(d.to_string()))
                        .collect(),
                ),
            );
        }
        deps_table.insert(q.clone(), qualified);
    }
    Ok(deps_table)
}

/// Depth-first walk; a back-edge aborts with the full cycle listed.
fn detect_cycles(
    dicts: &IndexMap<QualifiedTarget, Dict>,
    deps: &IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
) -> Result<(), GraphError> {
    // The petgraph view is also the quick pre-check; the manual walk
    // below only runs to reconstruct the offending chain.
    let index_of: IndexMap<&QualifiedTarget, usize> =
        dicts.keys().enumerate().map(|(i, q)| (q, i)).collect();
    let mut graph: DiGraphMap<TargetId, ()> = DiGraphMap::new();
    for (i, _) in dicts.keys().enumerate() {
        graph.add_node(TargetId(i));
    }
    for (q, q_deps) in deps {
        for dep in q_deps {
            graph.add_edge(TargetId(index_of[q]), TargetId(index_of[dep]), ());
        }
    }
    if !petgraph::algo::is_cyclic_directed(&graph) {
        return Ok(());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }
    let mut marks = vec![Mark::White; dicts.len()];
    let mut path: Vec<usize> = Vec::new();

    fn walk(
        node: usize,
        keys: &[&QualifiedTarget],
        deps: &IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
        index_of: &IndexMap<&QualifiedTarget, usize>,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::Gray;
        path.push(node);
        for dep in &deps[keys[node]] {
            let dep_index = index_of[dep];
            match marks[dep_index] {
                Mark::Gray => {
                    let start = path.iter().position(|&n| n == dep_index).unwrap_or(0);
                    let mut chain: Vec<usize> = path[start..].to_vec();
                    chain.push(dep_index);
                    return Some(chain);
                }
                Mark::White => {
                    if let Some(chain) = walk(dep_index, keys, deps, index_of, marks, path) {
                        return Some(chain);
                    }
                }
                Mark::Black => {}
            }
        }
        path.pop();
        marks[node] = Mark::Black;
        None
    }

    let keys: Vec<&QualifiedTarget> = dicts.keys().collect();
    for start in 0..keys.len() {
        if marks[start] == Mark::White {
            if let Some(chain) = walk(start, &keys, deps, &index_of, &mut marks, &mut path) {
                return Err(GraphError::Cycle {
                    chain: chain.into_iter().map(|i| keys[i].clone()).collect(),
                });
            }
        }
    }
    Ok(())
}

/// Topological flatten with a deterministic tie-break: among ready
/// targets, the one earliest by (build file path, declaration index)
/// goes first.
fn flatten(
    dicts: &IndexMap<QualifiedTarget, Dict>,
    deps: &IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
) -> Vec<QualifiedTarget> {
    // Declaration indices are increasing within a file, so sorting by
    // (file path, table index) yields the (file, declaration) order.
    let mut order: Vec<(usize, &QualifiedTarget)> = dicts.keys().enumerate().collect();
    order.sort_by(|(ai, aq), (bi, bq)| (&aq.build_file, ai).cmp(&(&bq.build_file, bi)));

    let mut emitted: IndexSet<&QualifiedTarget> = IndexSet::new();
    let mut flat = Vec::with_capacity(order.len());
    while emitted.len() < order.len() {
        let mut progressed = false;
        for &(_, q) in &order {
            if emitted.contains(q) {
                continue;
            }
            if deps[q].iter().all(|d| emitted.contains(d)) {
                emitted.insert(q);
                flat.push(q.clone());
                progressed = true;
            }
        }
        if !progressed {
            // Cycles were rejected before this point.
            panic!("no progress flattening an acyclic graph. This is a bug.");
        }
    }
    flat
}

/// Late expression phase plus configuration materialization for one
/// target.
fn finish_target(
    q: &QualifiedTarget,
    dicts: &mut IndexMap<QualifiedTarget, Dict>,
    default_variables: &Dict,
    depth: &std::path::Path,
    world: &dyn World,
) -> Result<(), GraphError> {
    let dict = dicts.get_mut(q).expect("collected target");
    let base_dir = q
        .build_file
        .parent()
        .unwrap_or(std::path::Path::new("/"))
        .to_path_buf();

    let mut scope = default_variables.clone();
    scope.insert(
        "DEPTH".to_owned(),
        Value::Str(paths::to_unix(&paths::relative_path(depth, &base_dir))),
    );
    scope.insert(
        "_target_name".to_owned(),
        Value::Str(q.name.to_string()),
    );
    if let Some(vars) = dict.get("variables").and_then(Value::as_dict) {
        for (k, v) in vars {
            scope.insert(k.clone(), v.clone());
        }
    }

    let cx = ExpandContext {
        world,
        file: &q.build_file,
        base_dir: &base_dir,
        phase: Phase::Late,
    };
    expand::evaluate(dict, &scope, &cx)?;

    merge::setup_configurations(dict, "target").map_err(|source| GraphError::Merge {
        target: q.clone(),
        source,
    })?;
    merge::process_list_filters(dict, "target").map_err(|source| GraphError::Merge {
        target: q.clone(),
        source,
    })?;
    Ok(())
}

fn target_types(dicts: &IndexMap<QualifiedTarget, Dict>) -> IndexMap<QualifiedTarget, TargetType> {
    dicts
        .iter()
        .map(|(q, dict)| {
            let ty = dict
                .get("type")
                .and_then(Value::as_str)
                .and_then(TargetType::parse)
                // Invalid types are rejected when freezing; None keeps
                // the rewrite pass conservative until then.
                .unwrap_or(TargetType::None);
            (q.clone(), ty)
        })
        .collect()
}

/// Fold each linking target's transitive static-library closure into
/// its direct dependencies, so emitters can place every needed archive
/// on the link line with single-hop lookups. Shared libraries stop the
/// walk: their dependents link the `.so` alone.
fn rewrite_link_dependencies(
    dicts: &mut IndexMap<QualifiedTarget, Dict>,
    deps: &mut IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
    types: &IndexMap<QualifiedTarget, TargetType>,
) {
    // contributions[q]: linkable outputs a dependent of q must link.
    let mut contributions: IndexMap<QualifiedTarget, Vec<QualifiedTarget>> = IndexMap::new();
    fn contribution(
        q: &QualifiedTarget,
        deps: &IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
        types: &IndexMap<QualifiedTarget, TargetType>,
        memo: &mut IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
    ) -> Vec<QualifiedTarget> {
        if let Some(cached) = memo.get(q) {
            return cached.clone();
        }
        let mut out = Vec::new();
        match types[q] {
            TargetType::SharedLibrary => out.push(q.clone()),
            TargetType::StaticLibrary => {
                out.push(q.clone());
                for dep in &deps[q] {
                    for item in contribution(dep, deps, types, memo) {
                        if !out.contains(&item) {
                            out.push(item);
                        }
                    }
                }
            }
            TargetType::None | TargetType::Settings => {
                for dep in &deps[q] {
                    for item in contribution(dep, deps, types, memo) {
                        if !out.contains(&item) {
                            out.push(item);
                        }
                    }
                }
            }
            TargetType::Executable | TargetType::LoadableModule => {}
        }
        memo.insert(q.clone(), out.clone());
        out
    }

    let linkers: Vec<QualifiedTarget> = deps
        .keys()
        .filter(|q| types[*q].uses_linker())
        .cloned()
        .collect();
    for q in linkers {
        let mut wanted = Vec::new();
        for dep in deps[&q].clone() {
            for item in contribution(&dep, deps, types, &mut contributions) {
                if item != q && !wanted.contains(&item) {
                    wanted.push(item);
                }
            }
        }
        let q_deps = deps.get_mut(&q).expect("linker target present");
        let mut added = false;
        for item in wanted {
            if !q_deps.contains(&item) {
                q_deps.push(item);
                added = true;
            }
        }
        if added {
            let dict = dicts.get_mut(&q).expect("linker target present");
            dict.insert(
                "dependencies".to_owned(),
                Value::List(q_deps.iter().map(|d| Value::Str(d.to_string())).collect()),
            );
        }
    }
}

/// Merge `direct_dependent_settings` (one hop),
/// `all_dependent_settings` (transitive), and `link_settings` (into the
/// nearest linking dependent) across the graph. Runs after cycle
/// detection, so the walk is DAG-shaped.
fn propagate_settings(
    flat_list: &[QualifiedTarget],
    dicts: &mut IndexMap<QualifiedTarget, Dict>,
    deps: &IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
    types: &IndexMap<QualifiedTarget, TargetType>,
) -> Result<(), GraphError> {
    // Transitive dependency sets, dependencies-first so each set only
    // needs its children's memoized sets.
    let mut deep: IndexMap<&QualifiedTarget, IndexSet<QualifiedTarget>> = IndexMap::new();
    for q in flat_list {
        let mut set = IndexSet::new();
        for dep in &deps[q] {
            set.insert(dep.clone());
            if let Some(sub) = deep.get(dep) {
                set.extend(sub.iter().cloned());
            }
        }
        deep.insert(q, set);
    }

    for q in flat_list {
        let mut incoming: Vec<Dict> = Vec::new();
        for dep in deep[q].clone() {
            if let Some(settings) = dicts[&dep].get("all_dependent_settings").and_then(Value::as_dict)
            {
                incoming.push(settings.clone());
            }
        }
        for dep in &deps[q] {
            if let Some(settings) = dicts[dep]
                .get("direct_dependent_settings")
                .and_then(Value::as_dict)
            {
                incoming.push(settings.clone());
            }
        }
        if types[q].uses_linker() {
            for dep in link_settings_sources(q, deps, types) {
                if let Some(settings) = dicts[&dep].get("link_settings").and_then(Value::as_dict) {
                    incoming.push(settings.clone());
                }
            }
        }
        if incoming.is_empty() {
            continue;
        }
        let dict = dicts.get_mut(q).expect("target listed in flat_list");
        for settings in incoming {
            merge::merge_settings(dict, &settings, "target").map_err(|source| {
                GraphError::Merge {
                    target: q.clone(),
                    source,
                }
            })?;
        }
    }
    Ok(())
}

/// The targets whose `link_settings` land on `q`'s link line: direct
/// dependencies, plus everything reachable through non-linking targets
/// (static libraries and flag carriers).
fn link_settings_sources(
    q: &QualifiedTarget,
    deps: &IndexMap<QualifiedTarget, Vec<QualifiedTarget>>,
    types: &IndexMap<QualifiedTarget, TargetType>,
) -> Vec<QualifiedTarget> {
    let mut out = Vec::new();
    let mut stack: Vec<QualifiedTarget> = deps[q].clone();
    while let Some(dep) = stack.pop() {
        if out.contains(&dep) {
            continue;
        }
        let through = matches!(
            types[&dep],
            TargetType::StaticLibrary | TargetType::None | TargetType::Settings
        );
        out.push(dep.clone());
        if through {
            stack.extend(deps[&dep].iter().cloned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{LoadOptions, load_files};
    use crate::world::CommandResult;
    use std::collections::HashMap;
    use std::path::Path;

    struct FileWorld {
        files: HashMap<PathBuf, String>,
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

    fn resolve_files(files: &[(&str, &str)]) -> Result<TargetGraph, GraphError> {
        let world = FileWorld {
            files: files
                .iter()
                .map(|(p, c)| (PathBuf::from(p), (*c).to_owned()))
                .collect(),
        };
        let defaults = Dict::new();
        let opts = LoadOptions {
            default_variables: &defaults,
            forced_includes: &[],
            depth: Path::new("/src"),
        };
        let loaded = load_files(&world, &[PathBuf::from(files[0].0)], &opts).unwrap();
        resolve(&loaded, &defaults, Path::new("/src"), &world)
    }

    #[test]
    fn dependencies_precede_dependents() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'dependencies': ['lib2', 'lib1']},
                {'target_name': 'lib1', 'type': 'static_library'},
                {'target_name': 'lib2', 'type': 'static_library', 'dependencies': ['lib1']},
             ]}",
        )])
        .unwrap();
        let names: Vec<&str> = graph.flat_list.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["lib1", "lib2", "prog"]);
        // Permutation of the target set, no duplicates.
        assert_eq!(graph.flat_list.len(), graph.targets.len());
    }

    #[test]
    fn cycle_is_fatal_and_lists_both_targets() {
        let err = resolve_files(&[
            (
                "/src/a.gyp",
                "{'targets': [{'target_name': 'A', 'type': 'none',
                               'dependencies': ['b.gyp:B']}]}",
            ),
            (
                "/src/b.gyp",
                "{'targets': [{'target_name': 'B', 'type': 'none',
                               'dependencies': ['a.gyp:A']}]}",
            ),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cycle"), "{message}");
        assert!(message.contains("a.gyp:A#target"), "{message}");
        assert!(message.contains("b.gyp:B#target"), "{message}");
    }

    #[test]
    fn unresolved_dependency_is_fatal() {
        let err = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [{'target_name': 'prog', 'type': 'executable',
                           'dependencies': ['nothere']}]}",
        )])
        .unwrap_err();
        assert!(matches!(err, GraphError::UnresolvedDependency { .. }));
    }

    #[test]
    fn toolsets_partition_the_graph() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'gen', 'type': 'executable', 'toolset': 'host'},
                {'target_name': 'prog', 'type': 'executable',
                 'dependencies': ['gen#host']},
             ]}",
        )])
        .unwrap();
        let r#gen = QualifiedTarget::new(Path::new("/src/p.gyp"), "gen", "host");
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        assert!(graph.targets.contains_key(&r#gen));
        assert_eq!(graph.targets[&prog].dependencies, vec![r#gen]);
    }

    #[test]
    fn duplicate_targets_are_fatal() {
        let err = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'x', 'type': 'none'},
                {'target_name': 'x', 'type': 'none'},
             ]}",
        )])
        .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTarget(_)));
    }

    #[test]
    fn direct_dependent_settings_reach_one_hop() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'dependencies': ['mid']},
                {'target_name': 'mid', 'type': 'static_library', 'dependencies': ['leaf']},
                {'target_name': 'leaf', 'type': 'static_library',
                 'direct_dependent_settings': {'defines': ['FROM_LEAF']}},
             ]}",
        )])
        .unwrap();
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        let mid = QualifiedTarget::new(Path::new("/src/p.gyp"), "mid", "target");
        let has_define = |q: &QualifiedTarget| {
            graph.targets[q].configurations.values().any(|c| {
                c.get("defines")
                    .and_then(Value::string_list)
                    .is_some_and(|d| d.contains(&"FROM_LEAF".to_owned()))
            })
        };
        assert!(has_define(&mid));
        assert!(!has_define(&prog));
    }

    #[test]
    fn all_dependent_settings_reach_transitively() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'dependencies': ['mid']},
                {'target_name': 'mid', 'type': 'static_library', 'dependencies': ['leaf']},
                {'target_name': 'leaf', 'type': 'static_library',
                 'all_dependent_settings': {'defines': ['EVERYWHERE']}},
             ]}",
        )])
        .unwrap();
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        let config = &graph.targets[&prog].configurations["Default"];
        assert_eq!(
            config["defines"],
            Value::List(vec!["EVERYWHERE".into()])
        );
    }

    #[test]
    fn link_settings_flow_through_static_libraries() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'dependencies': ['mid']},
                {'target_name': 'mid', 'type': 'static_library', 'dependencies': ['leaf']},
                {'target_name': 'leaf', 'type': 'static_library',
                 'link_settings': {'libraries': ['-lrt']}},
             ]}",
        )])
        .unwrap();
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        let mid = QualifiedTarget::new(Path::new("/src/p.gyp"), "mid", "target");
        assert_eq!(graph.targets[&prog].libraries, vec!["-lrt".to_owned()]);
        // Static libraries do not link; nothing lands on them.
        assert!(graph.targets[&mid].libraries.is_empty());
    }

    #[test]
    fn transitive_static_libraries_become_direct_link_deps() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'dependencies': ['outer']},
                {'target_name': 'outer', 'type': 'static_library', 'dependencies': ['inner']},
                {'target_name': 'inner', 'type': 'static_library'},
             ]}",
        )])
        .unwrap();
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        let inner = QualifiedTarget::new(Path::new("/src/p.gyp"), "inner", "target");
        assert!(graph.targets[&prog].dependencies.contains(&inner));
        // The declared list is preserved untouched.
        assert_eq!(
            graph.targets[&prog].dependencies_original,
            vec!["outer".to_owned()]
        );
    }

    #[test]
    fn shared_libraries_stop_link_closure() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'dependencies': ['dso']},
                {'target_name': 'dso', 'type': 'shared_library', 'dependencies': ['inner']},
                {'target_name': 'inner', 'type': 'static_library'},
             ]}",
        )])
        .unwrap();
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        let inner = QualifiedTarget::new(Path::new("/src/p.gyp"), "inner", "target");
        assert!(!graph.targets[&prog].dependencies.contains(&inner));
    }

    #[test]
    fn target_conditions_can_add_dependencies() {
        let graph = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable', 'sources': ['main.c'],
                 'target_conditions': [['1', {'dependencies': ['helper']}]]},
                {'target_name': 'helper', 'type': 'static_library', 'sources': ['helper.c']},
             ]}",
        )])
        .unwrap();
        // The late edge is ordered like a declared one.
        let names: Vec<&str> = graph.flat_list.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["helper", "prog"]);
        let prog = QualifiedTarget::new(Path::new("/src/p.gyp"), "prog", "target");
        let helper = QualifiedTarget::new(Path::new("/src/p.gyp"), "helper", "target");
        assert_eq!(graph.targets[&prog].dependencies, vec![helper]);
    }

    #[test]
    fn late_dependencies_are_validated() {
        let err = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'prog', 'type': 'executable',
                 'target_conditions': [['1', {'dependencies': ['nothere']}]]},
             ]}",
        )])
        .unwrap_err();
        assert!(matches!(err, GraphError::UnresolvedDependency { .. }));
    }

    #[test]
    fn late_dependency_cycles_are_detected() {
        let err = resolve_files(&[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'a', 'type': 'none',
                 'target_conditions': [['1', {'dependencies': ['b']}]]},
                {'target_name': 'b', 'type': 'none', 'dependencies': ['a']},
             ]}",
        )])
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn resolving_is_deterministic() {
        let files = &[(
            "/src/p.gyp",
            "{'targets': [
                {'target_name': 'z', 'type': 'none'},
                {'target_name': 'a', 'type': 'none'},
                {'target_name': 'm', 'type': 'none', 'dependencies': ['z']},
             ]}",
        )];
        let first = resolve_files(files).unwrap();
        let second = resolve_files(files).unwrap();
        let names = |g: &TargetGraph| {
            g.flat_list
                .iter()
                .map(|q| q.name.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&second));
    }
}
