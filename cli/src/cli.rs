use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[clap(name = "gypsum", version, about = "Generate native build files from declarative build descriptions")]
pub struct Args {
    /// Build files to process; defaults to every .gyp file in the
    /// current directory
    pub build_files: Vec<PathBuf>,

    /// Set variable NAME to VALUE (integers are coerced; a bare NAME
    /// becomes boolean true)
    #[clap(short = 'D', value_name = "NAME=VALUE")]
    pub defines: Vec<String>,

    /// Output format to generate: make, ninja, or scons (repeatable)
    #[clap(short = 'f', long = "format", value_name = "FORMAT")]
    pub formats: Vec<String>,

    /// File to include in every loaded build file (repeatable)
    #[clap(short = 'I', long = "include", value_name = "FILE")]
    pub includes: Vec<PathBuf>,

    /// Source-root anchor for path relativization
    #[clap(long, value_name = "PATH")]
    pub depth: Option<PathBuf>,

    /// Generator-specific KEY=VALUE flag (repeatable)
    #[clap(short = 'G', value_name = "KEY=VALUE")]
    pub generator_flags: Vec<String>,

    /// Suffix to add to generated output filenames
    #[clap(short = 'S', long = "suffix", default_value = "")]
    pub suffix: String,

    /// Redirect generated files under DIR
    #[clap(long = "generator-output", value_name = "DIR")]
    pub generator_output: Option<PathBuf>,

    /// Suppress environment-variable fallbacks (GYP_DEFINES and
    /// friends)
    #[clap(long = "ignore-environment")]
    pub ignore_environment: bool,
}
