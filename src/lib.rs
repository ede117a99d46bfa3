//! gypsum: a meta-build generator.
//!
//! Reads declarative build descriptions (libraries, executables,
//! actions, rules, copies, and their per-configuration settings),
//! resolves them into a target graph, and emits native build files for
//! one of three downstream drivers: a non-recursive Makefile layout,
//! a ninja layout, or a scons layout. It never compiles anything
//! itself.
//!
//! The pipeline is `load` → merge → expression evaluation (to a
//! fixpoint) → `graph` resolution → `emit`, with all side effects
//! routed through the [`world::World`] capability so tests can run
//! whole generations in memory.

pub mod emit;
pub mod expand;
pub mod graph;
pub mod load;
pub mod merge;
pub mod paths;
pub mod spec;
pub mod value;
pub mod world;

use std::path::PathBuf;

use tracing::info;

// Re-exports for convenience
pub use emit::{Format, GeneratorFlags, GeneratorOptions};
pub use graph::TargetGraph;
pub use paths::QualifiedTarget;
pub use value::{Dict, Value};
pub use world::{LOCAL_WORLD, LocalWorld, World};

/// Any fatal error from the pipeline. Each stage's error carries the
/// offending file (and key path where one exists).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] load::LoadError),

    #[error(transparent)]
    Graph(#[from] graph::GraphError),

    #[error(transparent)]
    Emit(#[from] emit::EmitError),
}

/// One full generation request: the external entry point parses the
/// command line and environment into this.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub format: Format,
    /// Entry build files, absolute.
    pub build_files: Vec<PathBuf>,
    /// `-D` defines (integer-coerced; bare names are boolean true).
    pub defines: Dict,
    /// `-I` forced includes, absolute.
    pub includes: Vec<PathBuf>,
    /// Source-root anchor, absolute.
    pub depth: PathBuf,
    /// `-G` generator flags.
    pub generator_flags: GeneratorFlags,
    /// `-S` suffix for generated file names.
    pub suffix: String,
    /// `--generator-output` redirect.
    pub generator_output: Option<PathBuf>,
    /// Arguments that reproduce this run minus format selection, for
    /// the emitted regeneration rule.
    pub regen_args: Vec<String>,
}

/// Run one generation end to end. Deterministic given identical inputs
/// and environment; aborts on the first fatal error with nothing
/// "published" as a completed build.
#[tracing::instrument(skip_all, fields(format = config.format.as_str()))]
pub fn generate(config: &GenerateConfig, world: &dyn World) -> Result<(), Error> {
    let mut default_variables = config.defines.clone();
    default_variables.insert(
        "GENERATOR".to_owned(),
        Value::Str(config.format.as_str().to_owned()),
    );
    for (key, value) in emit::generator_default_variables(config.format) {
        default_variables.entry(key).or_insert(value);
    }

    let load_options = load::LoadOptions {
        default_variables: &default_variables,
        forced_includes: &config.includes,
        depth: &config.depth,
    };
    let files = load::load_files(world, &config.build_files, &load_options)?;
    info!(files = files.len(), "loaded build files");

    let graph = graph::resolve(&files, &default_variables, &config.depth, world)?;
    info!(targets = graph.targets.len(), "resolved target graph");

    let options = GeneratorOptions {
        depth: config.depth.clone(),
        suffix: config.suffix.clone(),
        generator_output: config.generator_output.clone(),
    };
    let ctx = emit::GeneratorContext {
        world,
        options: &options,
        flags: &config.generator_flags,
        graph: &graph,
        build_files: &files,
        entry_files: &config.build_files,
        regen_args: &config.regen_args,
    };
    emit::generate(config.format, &ctx)?;
    Ok(())
}
