//! The scons back-end: one SConscript per target plus a wrapper per
//! build file.
//!
//! SCons computes its own content signatures, so this backend leans on
//! it for command-change detection instead of carrying a `do_cmd`
//! equivalent. Configuration settings are emitted as
//! `Append`/`FilterOut`/`Replace` dictionaries selected by
//! `$CONFIG_NAME` at build time.

use indexmap::IndexMap;

use crate::paths::{self, QualifiedTarget};
use crate::spec::{Target, TargetType};
use crate::value::{Dict, Value};

use super::{EmitError, GeneratorContext};

const HEADER: &str = "# This file is generated; do not edit.\n";

/// Render a string as a Python single-quoted literal.
fn py_repr(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn py_list(items: &[String], indent: &str) -> String {
    if items.is_empty() {
        return "[]".to_owned();
    }
    let body = items
        .iter()
        .map(|i| py_repr(i))
        .collect::<Vec<_>>()
        .join(&format!(",\n{indent}    "));
    format!("[{body}]")
}

fn py_value(value: &Value) -> String {
    match value {
        Value::Str(s) => py_repr(s),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_owned(),
        Value::List(items) => {
            let body = items.iter().map(py_value).collect::<Vec<_>>().join(", ");
            format!("[{body}]")
        }
        Value::Dict(d) => {
            let body = d
                .iter()
                .map(|(k, v)| format!("{}: {}", py_repr(k), py_value(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{body}}}")
        }
    }
}

fn config_list(config: &Dict, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::string_list)
        .unwrap_or_default()
}

pub fn generate(ctx: &GeneratorContext<'_>) -> Result<(), EmitError> {
    for q in &ctx.graph.flat_list {
        let target = &ctx.graph.targets[q];
        if target.target_type == TargetType::Settings {
            continue;
        }
        write_sconscript(ctx, q, target)?;
    }

    // One wrapper per build file, listing that file's SConscripts.
    for (build_file, _) in ctx.build_files {
        let rel = paths::to_unix(&paths::relative_path(build_file, &ctx.options.depth));
        let (dir, file) = match rel.rsplit_once('/') {
            Some((dir, file)) => (dir.to_owned(), file),
            None => (String::new(), rel.as_str()),
        };
        let Some(stem) = file.strip_suffix(".gyp") else {
            continue;
        };

        let mut sconscript_files: Vec<String> = Vec::new();
        for q in &ctx.graph.flat_list {
            let target = &ctx.graph.targets[q];
            if &q.build_file != build_file || target.target_type == TargetType::Settings {
                continue;
            }
            sconscript_files.push(format!(
                "{}{}.scons",
                target.name, ctx.options.suffix
            ));
        }
        if sconscript_files.is_empty() {
            continue;
        }
        sconscript_files.sort();

        let wrapper_rel = if dir.is_empty() {
            format!("{stem}_main{}.scons", ctx.options.suffix)
        } else {
            format!("{dir}/{stem}_main{}.scons", ctx.options.suffix)
        };
        let subdir = dir.rsplit_once('/').map(|(_, d)| d).unwrap_or(&dir);
        let mut out = String::new();
        out.push_str(HEADER);
        out.push_str(&wrapper_body(
            stem,
            subdir,
            &sconscript_files,
            &ctx.default_configuration(),
        ));
        ctx.write_file(&ctx.output_path(&wrapper_rel), &out)?;
    }
    Ok(())
}

fn write_sconscript(
    ctx: &GeneratorContext<'_>,
    q: &QualifiedTarget,
    target: &Target,
) -> Result<(), EmitError> {
    let base_path = ctx.base_path(q);
    let gyp_dir = if base_path.is_empty() {
        ctx.options.depth.clone()
    } else {
        ctx.options.depth.join(&base_path)
    };
    let gyp_dir = paths::to_unix(&gyp_dir);

    // Dependent static and shared libraries are folded into LIBS;
    // loadable modules become plain prerequisites.
    let mut libraries = target.libraries.clone();
    let mut prerequisites: Vec<String> = Vec::new();
    let mut scons_dependencies: Vec<String> = Vec::new();
    for dep in &target.dependencies {
        let Some(dep_target) = ctx.graph.target(dep) else {
            continue;
        };
        scons_dependencies.push(format!("Alias('gyp_target_{}')", dep_target.name));
        if dep_target.target_type.is_linkable() {
            let libname = dep_target
                .product_name
                .clone()
                .unwrap_or_else(|| dep_target.name.to_string());
            libraries.push(libname);
        }
        if dep_target.target_type == TargetType::LoadableModule {
            let name = dep_target
                .product_name
                .clone()
                .unwrap_or_else(|| dep_target.name.to_string());
            prerequisites.push(format!("${{SHLIBPREFIX}}{name}${{SHLIBSUFFIX}}"));
        }
    }

    let mut fp = String::new();
    fp.push_str(HEADER);
    fp.push_str("\nImport(\"env\")\n");

    // Per-configuration dictionaries with Append/FilterOut/Replace
    // semantics, selected at scons time via $CONFIG_NAME.
    fp.push_str("\nconfigurations = {\n");
    for (config_name, config) in &target.configurations {
        fp.push_str(&format!("    {} : {{\n", py_repr(config_name)));

        fp.push_str("        'Append' : dict(\n");
        emit_config_append(&mut fp, config, &libraries, "            ");
        fp.push_str("        ),\n");

        fp.push_str("        'FilterOut' : dict(\n");
        if let Some(remove) = config.get("scons_remove").and_then(Value::as_dict) {
            for (key, value) in remove {
                fp.push_str(&format!("             {} = {},\n", key, py_value(value)));
            }
        }
        fp.push_str("        ),\n");

        fp.push_str("        'Replace' : dict(\n");
        if let Some(settings) = config.get("scons_settings").and_then(Value::as_dict) {
            let mut keys: Vec<&String> = settings.keys().collect();
            keys.sort();
            for key in keys {
                fp.push_str(&format!(
                    "             {} = {},\n",
                    key,
                    py_value(&settings[key])
                ));
            }
        }
        fp.push_str("        ),\n");

        fp.push_str("    },\n");
    }
    fp.push_str("}\n");

    fp.push_str(&format!(
        "\nenv = env.Clone(COMPONENT_NAME={},\n                TARGET_NAME={})\n",
        py_repr(
            q.build_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
                .as_str()
        ),
        py_repr(&target.name)
    ));
    fp.push_str("\nconfig = configurations[env['CONFIG_NAME']]\n");
    fp.push_str("env.Append(**config['Append'])\n");
    fp.push_str("env.FilterOut(**config['FilterOut'])\n");
    fp.push_str("env.Replace(**config['Replace'])\n");

    if target.sources.is_empty() {
        fp.push_str("\ninput_files = []\n");
    } else {
        fp.push_str(&format!(
            "\ninput_files = {}\n",
            py_list(&target.sources, "")
        ));
    }

    fp.push_str("\ntarget_files = []\n");
    fp.push_str(&format!("prerequisites = {}\n", py_list(&prerequisites, "")));

    for action in &target.actions {
        let mut command: Vec<String> = vec!["cd".to_owned(), gyp_dir.clone(), "&&".to_owned()];
        command.extend(action.command.iter().cloned());
        let message = match &action.message {
            Some(m) => py_repr(m),
            None => "None".to_owned(),
        };
        fp.push_str(&format!(
            "\nif GetOption('verbose'):\n  _action = Action([{action}])\nelse:\n  _action = Action([{action}], {message})\n\
             _outputs = env.Command(\n  {outputs},\n  {inputs},\n  _action\n)\n",
            action = command
                .iter()
                .map(|a| py_repr(a))
                .collect::<Vec<_>>()
                .join(", "),
            message = message,
            outputs = py_list(&action.outputs, "  "),
            inputs = py_list(&action.inputs, "  "),
        ));
        if action.process_outputs_as_sources {
            fp.push_str("input_files.extend(_outputs)\n");
        }
        fp.push_str("prerequisites.extend(_outputs)\n");
    }

    for rule in &target.rules {
        let name = &rule.name;
        let mut command: Vec<String> = vec!["cd".to_owned(), gyp_dir.clone(), "&&".to_owned()];
        command.extend(rule.command.iter().cloned());
        let message = match &rule.message {
            Some(m) => py_repr(m),
            None => "None".to_owned(),
        };
        fp.push_str(&format!(
            "\n{name}_additional_inputs = {inputs}\n\
             {name}_outputs = {outputs}\n\
             def {name}_emitter(target, source, env):\n  \
             return ({name}_outputs, source + {name}_additional_inputs)\n\
             if GetOption('verbose'):\n  {name}_action = Action([{action}])\nelse:\n  \
             {name}_action = Action([{action}], {message})\n\
             env['BUILDERS']['{name}'] = Builder(action={name}_action, emitter={name}_emitter)\n\
             {name}_files = [f for f in input_files if str(f).endswith('.{extension}')]\n\
             for {name}_file in {name}_files:\n  _outputs = env.{name}({name}_file)\n",
            name = name,
            inputs = py_list(&rule.inputs, ""),
            outputs = py_list(&rule.outputs, ""),
            action = command
                .iter()
                .map(|a| py_repr(a))
                .collect::<Vec<_>>()
                .join(", "),
            message = message,
            extension = rule.extension,
        ));
        if rule.process_outputs_as_sources {
            fp.push_str(&format!("  input_files.Replace({name}_file, _outputs)\n"));
        }
        fp.push_str("prerequisites.extend(_outputs)\n");
    }

    let product_name = full_product_name(target);
    let builder = match target.target_type {
        TargetType::Executable => Some(format!("env.Program({}, input_files)", py_repr(&product_name))),
        TargetType::StaticLibrary => Some(format!(
            "env.StaticLibrary({}, input_files)",
            py_repr(&product_name)
        )),
        TargetType::SharedLibrary => Some(format!(
            "env.SharedLibrary({}, input_files)",
            py_repr(&product_name)
        )),
        TargetType::LoadableModule => Some(format!(
            "env.LoadableModule({}, input_files)",
            py_repr(&product_name)
        )),
        TargetType::None | TargetType::Settings => None,
    };
    if let Some(builder) = builder {
        fp.push_str(&format!("\n_outputs = {builder}\n"));
        fp.push_str("target_files.extend(_outputs)\n");
    }

    for copy in &target.copies {
        fp.push_str(&format!(
            "\n_outputs = env.Install({},\n    {}\n)\n",
            py_repr(&copy.destination),
            py_list(&copy.files, "    "),
        ));
        fp.push_str("prerequisites.extend(_outputs)\n");
    }

    fp.push_str(&format!(
        "\ngyp_target = env.Alias('gyp_target_{}', target_files)\n",
        target.name
    ));
    if !scons_dependencies.is_empty() {
        fp.push_str(&format!(
            "env.Requires(gyp_target, [\n    {}\n])\n",
            scons_dependencies.join(",\n    ")
        ));
    }
    fp.push_str("env.Requires(gyp_target, prerequisites)\n");
    fp.push_str("Return(\"gyp_target\")\n");

    let scons_rel = if base_path.is_empty() {
        format!("{}{}.scons", target.name, ctx.options.suffix)
    } else {
        format!("{}/{}{}.scons", base_path, target.name, ctx.options.suffix)
    };
    ctx.write_file(&ctx.output_path(&scons_rel), &fp)
}

/// Translate lower-case settings keywords into the upper-case SCons
/// construction variables.
fn emit_config_append(fp: &mut String, config: &Dict, libraries: &[String], indent: &str) {
    let mapping: IndexMap<&str, &str> = IndexMap::from_iter([
        ("asflags", "ASFLAGS"),
        ("cflags", "CCFLAGS"),
        ("defines", "CPPDEFINES"),
        ("include_dirs", "CPPPATH"),
        ("ldflags", "LINKFLAGS"),
    ]);
    for (gyp_var, scons_var) in mapping {
        let values = config_list(config, gyp_var);
        if !values.is_empty() {
            fp.push_str(&format!(
                "{indent}{scons_var} = [\n{indent}    {}\n{indent}],\n",
                values
                    .iter()
                    .map(|v| py_repr(v))
                    .collect::<Vec<_>>()
                    .join(&format!(",\n{indent}    "))
            ));
        }
    }
    if !libraries.is_empty() {
        fp.push_str(&format!(
            "{indent}LIBS = [\n{indent}    {}\n{indent}],\n",
            libraries
                .iter()
                .map(|v| py_repr(v))
                .collect::<Vec<_>>()
                .join(&format!(",\n{indent}    "))
        ));
    }
}

fn full_product_name(target: &Target) -> String {
    let name = target
        .product_name
        .clone()
        .unwrap_or_else(|| target.name.to_string());
    match &target.product_dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name,
    }
}

/// The wrapper configuration for building this entire "solution",
/// including all the specific targets in the various `.scons` files.
fn wrapper_body(
    name: &str,
    subdir: &str,
    sconscript_files: &[String],
    default_configuration: &str,
) -> String {
    let files = sconscript_files
        .iter()
        .map(|f| py_repr(f))
        .collect::<Vec<_>>()
        .join(",\n ");
    format!(
        r#"
__doc__ = '''
Wrapper configuration for building this entire "solution,"
including all the specific targets in various *.scons files.
'''

import os
import sys

# Support PROGRESS= to show progress in different ways.
if sys.platform == 'win32':
  console = 'con'
else:
  console = '/dev/tty'
p = ARGUMENTS.get('PROGRESS')
if p == 'spinner':
  Progress(['/\r', '|\r', '\\\r', '-\r'],
           interval=5,
           file=open(console, 'w'))
elif p == 'name':
  Progress('$TARGET\r', overwrite=True, file=open(console, 'w'))

# Set the default -j value based on the number of processors.
SetOption('num_jobs', (os.cpu_count() or 1) + 1)

# Since we set the -j value by default, suppress SCons warnings about being
# unable to support parallel build on versions of Python with no threading.
default_warnings = ['no-no-parallel-support']
SetOption('warn', default_warnings + GetOption('warn'))

AddOption('--configuration', nargs=1, dest='conf_list', default=[],
          action='append', help='Configuration to build.')

AddOption('--verbose', dest='verbose', default=False,
          action='store_true', help='Verbose command-line output.')


sconscript_files = [
 {files}]

target_alias_list = []

conf_list = GetOption('conf_list')
if not conf_list:
    conf_list = ['{default_configuration}']

for conf in conf_list:
  env = Environment(
      tools = ['ar', 'as', 'gcc', 'g++', 'gnulink'],
      CONFIG_NAME=conf,
      DESTINATION_ROOT='$MAIN_DIR/$CONFIG_NAME',
      MAIN_DIR=Dir('#').abspath,
      OBJ_DIR='$DESTINATION_ROOT/obj',
      TARGET_PLATFORM='LINUX',
  )
  if not GetOption('verbose'):
    env.SetDefault(
        ARCOMSTR='Creating library $TARGET',
        ASCOMSTR='Assembling $TARGET',
        CCCOMSTR='Compiling $TARGET',
        CXXCOMSTR='Compiling $TARGET',
        LDMODULECOMSTR='Building loadable module $TARGET',
        LINKCOMSTR='Linking $TARGET',
        RANLIBCOMSTR='Indexing $TARGET',
        SHCCCOMSTR='Compiling $TARGET',
        SHCXXCOMSTR='Compiling $TARGET',
        SHLINKCOMSTR='Linking $TARGET',
    )
  SConsignFile(env.File('$DESTINATION_ROOT/.sconsign').abspath)

  env.Dir('$OBJ_DIR').addRepository(env.Dir('$MAIN_DIR'))

  for sconscript in sconscript_files:
    target_alias = env.SConscript('$OBJ_DIR/{subdir}/' + sconscript,
                                  exports=['env'])
    if target_alias:
      target_alias_list.extend(target_alias)

Default(Alias('{name}', target_alias_list))
"#,
        files = files,
        subdir = subdir,
        name = name,
        default_configuration = default_configuration,
    )
}
