use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use gypsum::{Dict, GeneratorFlags, Value, paths};

use crate::cli::Args;

mod cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("gypsum: error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = Args::parse();

    if !args.ignore_environment {
        apply_environment(&mut args);
    }

    let cwd = std::env::current_dir().context("cannot determine the working directory")?;

    if args.build_files.is_empty() {
        args.build_files = find_build_files(&cwd)?;
    }
    if args.build_files.is_empty() {
        bail!("no build files found (pass one or run in a directory with .gyp files)");
    }

    let formats = if args.formats.is_empty() {
        vec!["make".to_owned()]
    } else {
        args.formats.clone()
    };

    let depth = paths::normalize(&absolutize(&cwd, args.depth.as_deref().unwrap_or(&cwd)));
    let build_files: Vec<PathBuf> = args
        .build_files
        .iter()
        .map(|f| paths::normalize(&absolutize(&cwd, f)))
        .collect();

    // If ~/.gyp/include.gypi exists, it is forcibly included into
    // every loaded build file, before any -I includes.
    let mut includes: Vec<PathBuf> = Vec::new();
    if !args.ignore_environment {
        if let Ok(home) = std::env::var("HOME") {
            let default_include = Path::new(&home).join(".gyp").join("include.gypi");
            if default_include.exists() {
                includes.push(default_include);
            }
        }
    }
    includes.extend(
        args.includes
            .iter()
            .map(|i| paths::normalize(&absolutize(&cwd, i))),
    );

    let defines = parse_defines(&args.defines);
    let generator_flags = GeneratorFlags::parse(&args.generator_flags);
    let regen_args = regeneration_args(&args);

    for format_name in &formats {
        let format = format_name
            .parse()
            .with_context(|| format!("bad -f {format_name}"))?;
        let config = gypsum::GenerateConfig {
            format,
            build_files: build_files.clone(),
            defines: defines.clone(),
            includes: includes.clone(),
            depth: depth.clone(),
            generator_flags: generator_flags.clone(),
            suffix: args.suffix.clone(),
            generator_output: args
                .generator_output
                .as_ref()
                .map(|d| paths::normalize(&absolutize(&cwd, d))),
            regen_args: regen_args.clone(),
        };
        gypsum::generate(&config, &gypsum::LOCAL_WORLD)?;
    }
    Ok(())
}

/// Fold the GYP_* environment variables into the parsed arguments,
/// tokenized with POSIX shell word splitting.
fn apply_environment(args: &mut Args) {
    let words = |name: &str| -> Vec<String> {
        std::env::var(name)
            .ok()
            .and_then(|v| shlex::split(&v))
            .unwrap_or_default()
    };

    // Command-line values win over the environment.
    let mut defines = words("GYP_DEFINES");
    defines.append(&mut args.defines);
    args.defines = defines;

    if args.formats.is_empty() {
        args.formats = words("GYP_GENERATORS");
    }

    let mut flags = words("GYP_GENERATOR_FLAGS");
    flags.append(&mut args.generator_flags);
    args.generator_flags = flags;

    if args.generator_output.is_none() {
        if let Ok(dir) = std::env::var("GYP_GENERATOR_OUTPUT") {
            if !dir.is_empty() {
                args.generator_output = Some(PathBuf::from(dir));
            }
        }
    }
}

fn find_build_files(cwd: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(cwd).context("cannot list the working directory")? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "gyp") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// `-D` sets variable defaults; values that parse as integers become
/// integers, and a bare name becomes boolean true.
fn parse_defines(defines: &[String]) -> Dict {
    let mut out = Dict::new();
    for define in defines {
        match define.split_once('=') {
            Some((name, value)) => match value.parse::<i64>() {
                Ok(n) => out.insert(name.to_owned(), Value::Int(n)),
                Err(_) => out.insert(name.to_owned(), Value::Str(value.to_owned())),
            },
            None => out.insert(define.clone(), Value::Bool(true)),
        };
    }
    out
}

/// The arguments a generated regeneration rule must replay, minus the
/// format selection (each emitter adds its own).
fn regeneration_args(args: &Args) -> Vec<String> {
    let mut out = Vec::new();
    for define in &args.defines {
        out.push("-D".to_owned());
        out.push(define.clone());
    }
    for include in &args.includes {
        out.push("-I".to_owned());
        out.push(include.display().to_string());
    }
    for flag in &args.generator_flags {
        out.push("-G".to_owned());
        out.push(flag.clone());
    }
    if !args.suffix.is_empty() {
        out.push("-S".to_owned());
        out.push(args.suffix.clone());
    }
    if let Some(dir) = &args.generator_output {
        out.push("--generator-output".to_owned());
        out.push(dir.display().to_string());
    }
    if args.ignore_environment {
        out.push("--ignore-environment".to_owned());
    }
    out
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
