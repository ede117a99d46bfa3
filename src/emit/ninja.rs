//! The ninja back-end: one master file with the shared rules and one
//! subninja per target.
//!
//! A small discourse on paths as used within the ninja build: all
//! files we produce (both at generation and at build time) appear in
//! the build directory (e.g. `out/Debug`). Paths within a build
//! description are relative to the directory containing it; call these
//! "gyp paths", and the path from the source root to that directory
//! the "base directory". All paths written into `.ninja` files are
//! relative to the build directory. [`NinjaWriter::gyp_path_to_ninja`]
//! translates between the two; [`NinjaWriter::gyp_path_to_unique_output`]
//! produces collision-free output paths under `obj/`.

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::paths::{self, QualifiedTarget};
use crate::spec::{Rule, Target, TargetType};
use crate::value::Value;

use super::ninja_syntax::Writer;
use super::{EmitError, GeneratorContext, check_path, compile_flavor, encode_shell_list};

fn ninja_base(cc: &str, cxx: &str) -> String {
    format!(
        "\
cc = {cc}
cxx = {cxx}

rule cc
  depfile = $out.d
  description = CC $out
  command = $cc -MMD -MF $out.d $defines $includes $cflags $cflags_c $
    -c $in -o $out

rule cxx
  depfile = $out.d
  description = CXX $out
  command = $cxx -MMD -MF $out.d $defines $includes $cflags $cflags_cc $
    -c $in -o $out

rule alink
  description = AR $out
  command = rm -f $out && ar rcs $out $in

rule solink
  description = SOLINK $out
  command = $cxx -shared $ldflags -o $out -Wl,-soname=$soname $
    -Wl,--whole-archive $in -Wl,--no-whole-archive $libs

rule solink_module
  description = SOLINK_MODULE $out
  command = $cxx -shared $ldflags -o $out -Wl,-soname=$soname $
    -Wl,--start-group $in -Wl,--end-group $libs

rule link
  description = LINK $out
  command = $cxx $ldflags -o $out -Wl,-rpath=\\$$ORIGIN/lib $
    -Wl,--start-group $in -Wl,--end-group $libs

rule stamp
  description = STAMP $out
  command = touch $out

rule copy
  description = COPY $in $out
  command = ln -f $in $out 2>/dev/null || cp -af $in $out

"
    )
}

pub fn generate(ctx: &GeneratorContext<'_>) -> Result<(), EmitError> {
    let config_name = match ctx.flags.get("config") {
        Some(config) => config.to_owned(),
        None => ctx.default_configuration(),
    };
    // builddir: relative path from source root to our output files,
    // e.g. "out/Debug".
    let builddir = format!(
        "{}/{}",
        ctx.flags.get("output_dir").unwrap_or("out"),
        config_name
    );

    let cc = std::env::var("CC").unwrap_or_else(|_| "gcc".to_owned());
    let cxx = std::env::var("CXX").unwrap_or_else(|_| "g++".to_owned());
    let mut master = String::new();
    master.push_str(&ninja_base(&cc, &cxx));

    let needed = ctx.needed_targets();
    let mut target_outputs: IndexMap<QualifiedTarget, (String, bool)> = IndexMap::new();
    let mut all_outputs: IndexSet<String> = IndexSet::new();
    let mut subninjas: Vec<String> = Vec::new();
    let mut build_files: IndexSet<String> = IndexSet::new();

    for q in &ctx.graph.flat_list {
        let target = &ctx.graph.targets[q];
        build_files.insert(ctx.rel_build_file(q));
        for included in &ctx.build_files[&q.build_file].included_files {
            build_files.insert(paths::to_unix(&paths::relative_path(
                included,
                &ctx.options.depth,
            )));
        }
        if target.target_type == TargetType::Settings {
            continue;
        }

        let base_dir = ctx.base_path(q);
        let output_file = if base_dir.is_empty() {
            format!("obj/{}.{}.ninja", target.name, target.toolset)
        } else {
            format!("obj/{}/{}.{}.ninja", base_dir, target.name, target.toolset)
        };

        let config = target
            .config(&config_name)
            .or_else(|| target.configurations.values().next())
            .cloned()
            .unwrap_or_default();

        let mut writer = NinjaWriter {
            ctx,
            qualified: q,
            target,
            build_to_base: join_unix(&paths::invert_relative_path(&builddir), &base_dir),
            base_to_build: join_unix(&paths::invert_relative_path(&base_dir), &builddir),
            base_dir,
            w: Writer::new(),
            target_outputs: &target_outputs,
        };
        let output = writer.write_spec(&config)?;
        let text = writer.w.into_string();
        ctx.write_file(&ctx.output_path(&format!("{builddir}/{output_file}")), &text)?;
        subninjas.push(output_file);

        if let Some(output) = output {
            if needed.contains(q) {
                all_outputs.insert(output.clone());
            }
            target_outputs.insert(q.clone(), (output, target.target_type.is_linkable()));
        }
    }

    for subninja in &subninjas {
        master.push_str(&format!("subninja {subninja}\n"));
    }

    if ctx.flags.get_bool("auto_regeneration", true) {
        let mut command: Vec<String> = vec!["gypsum".to_owned(), "-fninja".to_owned()];
        command.extend(ctx.regen_args.iter().cloned());
        for entry in ctx.entry_files {
            command.push(paths::to_unix(&paths::relative_path(
                entry,
                &ctx.options.depth,
            )));
        }
        let up = paths::invert_relative_path(&builddir);
        master.push_str("\nrule gyp_regen\n");
        master.push_str(&format!(
            "  command = cd {up}; {}\n",
            encode_shell_list(&command)
        ));
        master.push_str("  description = REGENERATE $out\n");
        master.push_str("  generator = 1\n");
        let deps: Vec<String> = build_files
            .iter()
            .map(|f| join_unix(&up, f))
            .collect();
        master.push_str(&format!("build build.ninja: gyp_regen {}\n", deps.join(" ")));
    }

    if !all_outputs.is_empty() {
        master.push_str(&format!(
            "\nbuild all: phony || {}\n",
            all_outputs.iter().cloned().collect::<Vec<_>>().join(" ")
        ));
    }

    ctx.write_file(&ctx.output_path(&format!("{builddir}/build.ninja")), &master)
}

fn join_unix(a: &str, b: &str) -> String {
    let joined = std::path::Path::new(a).join(b);
    paths::to_unix(&paths::normalize(&joined))
}

struct NinjaWriter<'a> {
    ctx: &'a GeneratorContext<'a>,
    qualified: &'a QualifiedTarget,
    target: &'a Target,
    /// Path from source root to the directory containing this build
    /// file; input paths are relative to it.
    base_dir: String,
    /// Relative path from the build output dir to the base dir.
    build_to_base: String,
    /// Relative path from the base dir to the build dir.
    base_to_build: String,
    w: Writer,
    target_outputs: &'a IndexMap<QualifiedTarget, (String, bool)>,
}

impl NinjaWriter<'_> {
    /// Write the build rules for this target. Returns the path to the
    /// build output, or None when nothing is produced.
    fn write_spec(&mut self, config: &crate::value::Dict) -> Result<Option<String>, EmitError> {
        // prebuild is what this target depends on before running any
        // of its internal steps: a single stamp gathering the outputs
        // of its dependencies.
        let mut prebuild: Vec<String> = Vec::new();
        let prebuild_deps: Vec<String> = self
            .target
            .dependencies
            .iter()
            .filter_map(|dep| self.target_outputs.get(dep).map(|(path, _)| path.clone()))
            .collect();
        if !prebuild_deps.is_empty() {
            let stamp = self.stamp_path("predepends");
            self.w
                .build(&[stamp.clone()], "stamp", &prebuild_deps, &[], &[], &[]);
            self.w.newline();
            prebuild.push(stamp);
        }

        // Actions, rules, and copies must happen before we compile any
        // sources, so they become order-only predependencies of the
        // compile steps.
        let mut extra_sources: Vec<String> = Vec::new();
        let sources_predepends =
            self.write_actions_rules_copies(&mut extra_sources, &prebuild)?;

        let mut sources = self.target.sources.clone();
        sources.extend(extra_sources);
        let mut link_deps = Vec::new();
        if !sources.is_empty() {
            let predepends = if sources_predepends.is_empty() {
                &prebuild
            } else {
                &sources_predepends
            };
            link_deps = self.write_sources(config, &sources, predepends)?;
            // Some actions/rules output sources that are already
            // object files.
            for source in &sources {
                if source.ends_with(".o") {
                    link_deps.push(self.gyp_path_to_ninja(source));
                }
            }
        }

        // The final output of the target depends on the last outputs
        // of the steps above.
        let final_deps = if !link_deps.is_empty() {
            link_deps
        } else if !sources_predepends.is_empty() {
            sources_predepends
        } else {
            prebuild
        };
        if final_deps.is_empty() {
            return Ok(None);
        }
        self.write_target(config, final_deps).map(Some)
    }

    fn write_actions_rules_copies(
        &mut self,
        extra_sources: &mut Vec<String>,
        prebuild: &[String],
    ) -> Result<Vec<String>, EmitError> {
        let mut outputs = Vec::new();
        outputs.extend(self.write_actions(extra_sources, prebuild)?);
        outputs.extend(self.write_rules(extra_sources, prebuild)?);
        outputs.extend(self.write_copies(prebuild)?);

        // Collapse many outputs into a single stamp so downstream build
        // edges stay small.
        if outputs.len() > 1 {
            let stamp = self.stamp_path("actions_rules_copies");
            self.w.build(&[stamp.clone()], "stamp", &outputs, &[], &[], &[]);
            self.w.newline();
            outputs = vec![stamp];
        }
        Ok(outputs)
    }

    fn write_actions(
        &mut self,
        extra_sources: &mut Vec<String>,
        prebuild: &[String],
    ) -> Result<Vec<String>, EmitError> {
        let mut all_outputs = Vec::new();
        for action in self.target.actions.clone() {
            let description = match &action.message {
                Some(message) => format!("ACTION {}", self.expand_special(message, None)),
                None => format!("ACTION {}: {}", self.target.name, action.name),
            };
            let rule_name = self.write_new_ninja_rule(&action.name, &action.command, &description);

            let inputs: Vec<String> =
                action.inputs.iter().map(|i| self.gyp_path_to_ninja(i)).collect();
            if action.process_outputs_as_sources {
                extra_sources.extend(action.outputs.iter().cloned());
            }
            let outputs: Vec<String> =
                action.outputs.iter().map(|o| self.gyp_path_to_ninja(o)).collect();
            for path in outputs.iter().chain(&inputs) {
                check_path(self.qualified, path)?;
            }

            self.w.build(&outputs, &rule_name, &inputs, &[], prebuild, &[]);
            all_outputs.extend(outputs);
            self.w.newline();
        }
        Ok(all_outputs)
    }

    fn write_rules(
        &mut self,
        extra_sources: &mut Vec<String>,
        prebuild: &[String],
    ) -> Result<Vec<String>, EmitError> {
        let mut all_outputs = Vec::new();
        for rule in self.target.rules.clone() {
            let description = match &rule.message {
                Some(message) => format!("RULE {}", self.expand_special(message, None)),
                None => format!("RULE {}: {} $source", self.target.name, rule.name),
            };
            let rule_name = self.write_new_ninja_rule(&rule.name, &rule.command, &description);

            // Rules can use special variables that vary per source
            // file; compute which ones the command actually needs.
            let special_locals = ["source", "root", "ext", "name"];
            let mut needed: IndexSet<&str> = IndexSet::new();
            needed.insert("source");
            for argument in &rule.command {
                for var in special_locals {
                    if argument.contains(&format!("${var}")) {
                        needed.insert(var);
                    }
                }
            }

            for source in &rule.rule_sources {
                let basename = source.rsplit_once('/').map(|(_, f)| f).unwrap_or(source);
                let (root, ext) = match basename.rsplit_once('.') {
                    Some((root, ext)) => (root, ext),
                    None => (basename, ""),
                };

                let outputs: Vec<String> = rule
                    .outputs
                    .iter()
                    .map(|o| self.gyp_path_to_ninja(&Rule::expand_input_root(o, root)))
                    .collect();
                if rule.process_outputs_as_sources {
                    extra_sources.extend(
                        rule.outputs.iter().map(|o| Rule::expand_input_root(o, root)),
                    );
                }

                let mut bindings: Vec<(String, String)> = Vec::new();
                for var in &needed {
                    match *var {
                        "root" => bindings.push(("root".to_owned(), root.to_owned())),
                        // $source is a parameter to the rule action and
                        // runs relative to the base dir, so it must not
                        // be converted to a ninja path.
                        "source" => bindings.push((
                            "source".to_owned(),
                            self.expand_special(source, Some(&self.base_to_build.clone())),
                        )),
                        "ext" => bindings.push(("ext".to_owned(), ext.to_owned())),
                        "name" => bindings.push(("name".to_owned(), basename.to_owned())),
                        _ => {}
                    }
                }

                let implicit: Vec<String> =
                    rule.inputs.iter().map(|i| self.gyp_path_to_ninja(i)).collect();
                let source_path = self.gyp_path_to_ninja(source);
                for path in outputs.iter().chain(&implicit).chain([&source_path]) {
                    check_path(self.qualified, path)?;
                }
                self.w.build(
                    &outputs,
                    &rule_name,
                    &[source_path],
                    &implicit,
                    prebuild,
                    &bindings,
                );
                all_outputs.extend(outputs);
            }
            self.w.newline();
        }
        Ok(all_outputs)
    }

    fn write_copies(&mut self, prebuild: &[String]) -> Result<Vec<String>, EmitError> {
        let mut outputs = Vec::new();
        for copy in self.target.copies.clone() {
            for file in &copy.files {
                let file = file.trim_end_matches('/');
                let basename = file.rsplit_once('/').map(|(_, f)| f).unwrap_or(file);
                let src = self.gyp_path_to_ninja(file);
                let dst = self.gyp_path_to_ninja(&format!("{}/{}", copy.destination, basename));
                check_path(self.qualified, &src)?;
                check_path(self.qualified, &dst)?;
                self.w
                    .build(&[dst.clone()], "copy", &[src], &[], prebuild, &[]);
                outputs.push(dst);
            }
        }
        if !outputs.is_empty() {
            self.w.newline();
        }
        Ok(outputs)
    }

    /// Write compile edges for every source, with order-only edges on
    /// the predepends stamp so generated headers exist before any
    /// compilation, without forcing recompiles when they are remade
    /// with identical contents.
    fn write_sources(
        &mut self,
        config: &crate::value::Dict,
        sources: &[String],
        predepends: &[String],
    ) -> Result<Vec<String>, EmitError> {
        let defines: Vec<String> = config_list(config, "defines")
            .iter()
            .map(|d| format!("-D{}", encode_define(d)))
            .collect();
        self.write_variable_list("defines", &defines);
        let includes: Vec<String> = config_list(config, "include_dirs")
            .iter()
            .map(|i| format!("-I{}", self.gyp_path_to_ninja(i)))
            .collect();
        self.write_variable_list("includes", &includes);
        self.write_variable_list("cflags", &config_list(config, "cflags"));
        self.write_variable_list("cflags_c", &config_list(config, "cflags_c"));
        self.write_variable_list("cflags_cc", &config_list(config, "cflags_cc"));
        self.w.newline();

        let mut outputs = Vec::new();
        for source in sources {
            let Some(command) = compile_flavor(source) else {
                if !source.ends_with(".h") && !source.ends_with(".o") {
                    warn!(
                        target_name = %self.target.name,
                        source, "skipping source with unknown extension"
                    );
                }
                continue;
            };
            let input = self.gyp_path_to_ninja(source);
            let stem = source.rsplit_once('.').map(|(s, _)| s).unwrap_or(source);
            let output = self.gyp_path_to_unique_output(&format!("{stem}.o"), true);
            check_path(self.qualified, &input)?;
            check_path(self.qualified, &output)?;
            self.w
                .build(&[output.clone()], command, &[input], &[], predepends, &[]);
            outputs.push(output);
        }
        self.w.newline();
        Ok(outputs)
    }

    fn write_target(
        &mut self,
        config: &crate::value::Dict,
        mut final_deps: Vec<String>,
    ) -> Result<String, EmitError> {
        let output = self.compute_output();
        check_path(self.qualified, &output)?;

        let output_uses_linker = self.target.target_type.uses_linker();

        // Two kinds of dependencies:
        // - Linkable (a .a or .so): they go on the link line.
        // - Non-linkable (e.g. a stamp): implicit deps only.
        let mut implicit_deps: Vec<String> = Vec::new();
        if output_uses_linker {
            let mut extra: Vec<String> = Vec::new();
            for dep in &self.target.dependencies {
                let Some((input, linkable)) = self.target_outputs.get(dep) else {
                    continue;
                };
                if *linkable {
                    if !extra.contains(input) {
                        extra.push(input.clone());
                    }
                } else if !implicit_deps.contains(input) {
                    implicit_deps.push(input.clone());
                }
            }
            final_deps.extend(extra);
        }

        let command = match self.target.target_type {
            TargetType::Executable => "link",
            TargetType::StaticLibrary => "alink",
            TargetType::SharedLibrary => "solink",
            TargetType::LoadableModule => "solink_module",
            TargetType::None => "stamp",
            TargetType::Settings => unreachable!("settings targets are not written"),
        };

        if output_uses_linker {
            let ldflags: Vec<String> = uniq(
                config_list(config, "ldflags")
                    .iter()
                    .map(|f| self.expand_special(f, None))
                    .collect(),
            );
            self.write_variable_list("ldflags", &ldflags);
            let libs: Vec<String> = uniq(
                self.target
                    .libraries
                    .iter()
                    .map(|l| self.expand_special(l, None))
                    .collect(),
            );
            self.write_variable_list("libs", &libs);
        }

        let mut bindings: Vec<(String, String)> = Vec::new();
        if matches!(
            self.target.target_type,
            TargetType::SharedLibrary | TargetType::LoadableModule
        ) {
            let soname = output.rsplit_once('/').map(|(_, f)| f).unwrap_or(&output);
            bindings.push(("soname".to_owned(), soname.to_owned()));
        }

        self.w
            .build(&[output.clone()], command, &final_deps, &implicit_deps, &[], &bindings);

        // A short name to build this target by, for command-line use.
        if self.target.name != output {
            self.w.build(
                &[self.target.name.to_string()],
                "phony",
                &[output.clone()],
                &[],
                &[],
                &[],
            );
        }
        Ok(output)
    }

    /// Expand `$!PRODUCT_DIR` and `$!INTERMEDIATE_DIR`. With no
    /// `product_dir` the cwd is assumed to already be the product dir.
    fn expand_special(&self, path: &str, product_dir: Option<&str>) -> String {
        const PRODUCT_DIR: &str = "$!PRODUCT_DIR";
        const INTERMEDIATE_DIR: &str = "$!INTERMEDIATE_DIR";

        let mut path = path.to_owned();
        if path.contains(PRODUCT_DIR) {
            match product_dir {
                Some(dir) => path = path.replace(PRODUCT_DIR, dir),
                None => {
                    path = path.replace(&format!("{PRODUCT_DIR}/"), "");
                    path = path.replace(PRODUCT_DIR, ".");
                }
            }
        }
        if path.contains(INTERMEDIATE_DIR) {
            let int_dir = self.gyp_path_to_unique_output("gen", true);
            let prefixed = match product_dir {
                Some(dir) => join_unix(dir, &int_dir),
                None => int_dir,
            };
            path = path.replace(INTERMEDIATE_DIR, &prefixed);
        }
        path
    }

    /// Translate a gyp path to a ninja path.
    fn gyp_path_to_ninja(&self, path: &str) -> String {
        if path.starts_with("$!") {
            return self.expand_special(path, None);
        }
        join_unix(&self.build_to_base, path)
    }

    /// Translate a gyp path to a ninja path for writing output,
    /// namespaced by toolset so cross-compiles do not collide.
    ///
    /// If `qualified`, the filename is prefixed with the target name,
    /// which matters when two targets compile the same source.
    fn gyp_path_to_unique_output(&self, path: &str, qualified: bool) -> String {
        let path = self.expand_special(path, None);
        let (dir, basename) = match path.rsplit_once('/') {
            Some((dir, basename)) => (dir, basename),
            None => ("", path.as_str()),
        };
        let basename = if qualified {
            format!("{}.{}", self.target.name, basename)
        } else {
            basename.to_owned()
        };
        let mut out = format!("obj/{}", self.target.toolset);
        for part in [self.base_dir.as_str(), dir, &basename] {
            if !part.is_empty() {
                out = join_unix(&out, part);
            }
        }
        out
    }

    /// A stamp file collapsing a dependency on many files into one.
    fn stamp_path(&self, name: &str) -> String {
        self.gyp_path_to_unique_output(&format!("{name}.stamp"), true)
    }

    fn compute_output(&self) -> String {
        let filename = self
            .target
            .output_file_name()
            .expect("settings targets are not written");
        if let Some(product_dir) = &self.target.product_dir {
            return self.expand_special(&join_unix(product_dir, &filename), None);
        }
        // Executables and loadable modules go into the output root,
        // shared libraries into the shared lib dir, and everything
        // else into the object tree.
        match self.target.target_type {
            TargetType::Executable | TargetType::LoadableModule => filename,
            TargetType::SharedLibrary => format!("lib/{filename}"),
            _ => self.gyp_path_to_unique_output(&filename, false),
        }
    }

    fn write_variable_list(&mut self, name: &str, values: &[String]) {
        self.w.variable(name, &values.join(" "), 0);
    }

    /// Write a new ninja rule for an action or rule command and return
    /// its (target-qualified) name.
    fn write_new_ninja_rule(&mut self, name: &str, args: &[String], description: &str) -> String {
        // Rule names are global to a ninja build; qualify with the
        // target name.
        let rule_name = format!("{}.{}", self.target.name, name).replace(' ', "_");

        // Commands run from the base directory: cd into it and adjust
        // path-shaped arguments to match.
        let args: Vec<String> = args
            .iter()
            .map(|a| self.expand_special(a, Some(&self.base_to_build.clone())))
            .collect();
        let command = format!("cd {}; {}", self.build_to_base, encode_shell_list(&args));
        self.w.rule(&rule_name, &command, Some(description));
        self.w.newline();
        rule_name
    }
}

fn config_list(config: &crate::value::Dict, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::string_list)
        .unwrap_or_default()
}

fn uniq(values: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn encode_define(define: &str) -> String {
    // Quote for the shell first, then escape for ninja.
    super::encode_shell_argument(define).replace('$', "$$")
}
