//! The make back-end: a non-recursive Makefile layout.
//!
//! This is roughly the Makefile system used by the Linux kernel, but
//! non-recursive: the entire dependency graph is handed to one make
//! invocation. Each target gets its own `.mk` fragment, and the root
//! Makefile includes every fragment. All fragments share a global
//! namespace, so anything order-sensitive must use `:=`.

use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;
use tracing::warn;

use crate::paths::{self, QualifiedTarget};
use crate::spec::{Rule, Target, TargetType};
use crate::value::{Dict, Value};

use super::{EmitError, GeneratorContext, check_path, compile_flavor, encode_shell_list};

/// The `.d` checking code uses make functions that cannot handle
/// spaces, so dependency files have spaces replaced with this
/// character; the header documents it in the output.
const SPACE_REPLACEMENT: char = '?';

const HEADER: &str = "# This file is generated by gypsum; do not edit.\n\n";

const LINK_COMMANDS: &str = "\
# Due to circular dependencies between libraries :(, we wrap the
# special \"figure out circular dependencies\" flags around the entire
# input list during linking.
quiet_cmd_link = LINK($(TOOLSET)) $@
cmd_link = $(LINK.$(TOOLSET)) $(GYP_LDFLAGS) $(LDFLAGS.$(TOOLSET)) -o $@ -Wl,--start-group $(LD_INPUTS) -Wl,--end-group $(LIBS)

# We support two kinds of shared objects (.so):
# 1) shared_library, which is just bundling together many dependent libraries
# into a link line.
# 2) loadable_module, which is generating a module intended for dlopen().
#
# They differ only slightly:
# In the former case, we want to package all dependent code into the .so.
# In the latter case, we want to package just the API exposed by the
# outermost module.
# This means shared_library uses --whole-archive, while loadable_module doesn't.
# (Note that --whole-archive is incompatible with the --start-group used in
# normal linking.)

# Other shared-object link notes:
# - Set SONAME to the library filename so our binaries don't reference
# the local, absolute paths used on the link command-line.
quiet_cmd_solink = SOLINK($(TOOLSET)) $@
cmd_solink = $(LINK.$(TOOLSET)) -shared $(GYP_LDFLAGS) $(LDFLAGS.$(TOOLSET)) -Wl,-soname=$(@F) -o $@ -Wl,--whole-archive $(LD_INPUTS) -Wl,--no-whole-archive $(LIBS)

quiet_cmd_solink_module = SOLINK_MODULE($(TOOLSET)) $@
cmd_solink_module = $(LINK.$(TOOLSET)) -shared $(GYP_LDFLAGS) $(LDFLAGS.$(TOOLSET)) -Wl,-soname=$(@F) -o $@ -Wl,--start-group $(filter-out FORCE_DO_CMD, $^) -Wl,--end-group $(LIBS)
";

fn shared_header(srcdir: &str, builddir: &str, default_configuration: &str) -> String {
    let part_one = format!(
        "\
# We borrow heavily from the kernel build setup, though we are simpler since
# we don't have Kconfig tweaking settings on us.

# The implicit make rules have it looking for RCS files, among other things.
# We instead explicitly write all the rules we care about.
# It's even quicker (saves ~200ms) to pass -r on the command line.
MAKEFLAGS=-r

# The source directory tree.
srcdir := {srcdir}

# The name of the builddir.
builddir_name ?= {builddir}

# The V=1 flag on command line makes us verbosely print command lines.
ifdef V
  quiet=
else
  quiet=quiet_
endif

# Specify BUILDTYPE=Release on the command line for a release build.
BUILDTYPE ?= {default_configuration}

# Directory all our build output goes into.
builddir ?= $(builddir_name)/$(BUILDTYPE)
abs_builddir := $(abspath $(builddir))
depsdir := $(builddir)/.deps

# Object output directory.
obj := $(builddir)/obj
abs_obj := $(abspath $(obj))

# We build up a list of every single one of the targets so we can slurp in the
# generated dependency rule Makefiles in one pass.
all_deps :=

# C++ apps need to be linked with g++.
#
# Note, the flock is used to serialize linking. Linking is a memory-intensive
# process so running parallel links can often lead to thrashing. To disable
# the serialization, override FLOCK via an environment variable as follows:
#
#   export FLOCK=
#
# This will allow make to invoke N linker processes as specified in -jN.
FLOCK ?= flock $(builddir)/linker.lock
LINK ?= $(FLOCK) $(CXX)

CC.target ?= $(CC)
CFLAGS.target ?= $(CFLAGS)
CXX.target ?= $(CXX)
CXXFLAGS.target ?= $(CXXFLAGS)
LINK.target ?= $(LINK)
LDFLAGS.target ?= $(LDFLAGS)
AR.target ?= $(AR)
ARFLAGS.target ?= crs

CC.host ?= gcc
CFLAGS.host ?=
CXX.host ?= g++
CXXFLAGS.host ?=
LINK.host ?= g++
LDFLAGS.host ?=
AR.host ?= ar
ARFLAGS.host := crs

# Define a dir function that can handle spaces.
# http://www.gnu.org/software/make/manual/make.html#Syntax-of-Functions
# \"leading spaces cannot appear in the text of the first argument as written.
# These characters can be put into the argument value by variable substitution.\"
empty :=
space := $(empty) $(empty)

# http://stackoverflow.com/questions/1189781/using-make-dir-or-notdir-on-a-path-with-spaces
replace_spaces = $(subst $(space),{SPACE_REPLACEMENT},$1)
unreplace_spaces = $(subst {SPACE_REPLACEMENT},$(space),$1)
dirx = $(call unreplace_spaces,$(dir $(call replace_spaces,$1)))

# Flags to make gcc output dependency info.  Note that you need to be
# careful here to use the flags that ccache and distcc can understand.
# We write to a dep file on the side first and then rename at the end
# so we can't end up with a broken dep file.
depfile = $(depsdir)/$(call replace_spaces,$@).d
DEPFLAGS = -MMD -MF $(depfile).raw

# We have to fixup the deps output in a few ways.
# (1) the file output should mention the proper .o file.
# ccache or distcc lose the path to the target, so we convert a rule of
# the form:
#   foobar.o: DEP1 DEP2
# into
#   path/to/foobar.o: DEP1 DEP2
# (2) we want missing files not to cause us to fail to build.
# We want to rewrite
#   foobar.o: DEP1 DEP2 \\
#               DEP3
# to
#   DEP1:
#   DEP2:
#   DEP3:
# so if the files are missing, they're just considered phony rules.
# We have to do some pretty insane escaping to get those backslashes
# and dollar signs past make, the shell, and sed at the same time.
# Doesn't work with spaces, but that's fine: .d files have spaces in
# their names replaced with other characters.
",
        srcdir = srcdir,
        builddir = builddir,
        default_configuration = default_configuration,
        SPACE_REPLACEMENT = SPACE_REPLACEMENT,
    );

    let fixup_dep = r#"define fixup_dep
# The depfile may not exist if the input file didn't have any #includes.
touch $(depfile).raw
# Fixup path as in (1).
sed -e "s|^$(notdir $@)|$@|" $(depfile).raw >> $(depfile)
# Add extra rules as in (2).
# We remove slashes and replace spaces with new lines;
# remove blank lines;
# delete the first line and append a colon to the remaining lines.
sed -e 's|\\||' -e 'y| |\n|' $(depfile).raw |\
  grep -v '^$$'                             |\
  sed -e 1d -e 's|$$|:|'                     \
    >> $(depfile)
rm $(depfile).raw
endef
"#;

    let commands = "\
# Command definitions:
# - cmd_foo is the actual command to run;
# - quiet_cmd_foo is the brief-output summary of the command.

quiet_cmd_cc = CC($(TOOLSET)) $@
cmd_cc = $(CC.$(TOOLSET)) $(GYP_CFLAGS) $(DEPFLAGS) $(CFLAGS.$(TOOLSET)) -c -o $@ $<

quiet_cmd_cxx = CXX($(TOOLSET)) $@
cmd_cxx = $(CXX.$(TOOLSET)) $(GYP_CXXFLAGS) $(DEPFLAGS) $(CXXFLAGS.$(TOOLSET)) -c -o $@ $<

quiet_cmd_alink = AR($(TOOLSET)) $@
cmd_alink = rm -f $@ && $(AR.$(TOOLSET)) $(ARFLAGS.$(TOOLSET)) $@ $(filter %.o,$^)

quiet_cmd_touch = TOUCH $@
cmd_touch = touch $@

quiet_cmd_copy = COPY $@
# send stderr to /dev/null to ignore messages when linking directories.
cmd_copy = ln -f \"$<\" \"$@\" 2>/dev/null || (rm -rf \"$@\" && cp -af \"$<\" \"$@\")

";

    let escapes = r#"# Define an escape_quotes function to escape single quotes.
# This allows us to handle quotes properly as long as we always use
# use single quotes and escape_quotes.
escape_quotes = $(subst ','\'',$(1))
# This comment is here just to include a ' to unconfuse syntax highlighting.
# Define an escape_vars function to escape '$' variable syntax.
# This allows us to read/write command lines with shell variables (e.g.
# $LD_LIBRARY_PATH), without triggering make substitution.
escape_vars = $(subst $$,$$$$,$(1))
# Helper that expands to a shell command to echo a string exactly as it is in
# make. This uses printf instead of echo because printf's behaviour with respect
# to escape sequences is more portable than echo's across different shells
# (e.g., dash, bash).
exact_echo = printf '%s\n' '$(call escape_quotes,$(1))'
"#;

    let do_cmd = format!(
        "\
# Helper to compare the command we're about to run against the command
# we logged the last time we ran the command.  Produces an empty
# string (false) when the commands match.
# Tricky point: Make has no string-equality test function.
# We instead substitute each for the empty string into the other, and
# say they're equal if both substitutions produce the empty string.
# .d files contain {SPACE_REPLACEMENT} instead of spaces, take that into account.
command_changed = $(or $(subst $(cmd_$(1)),,$(cmd_$(call replace_spaces,$@))),\\
                       $(subst $(cmd_$(call replace_spaces,$@)),,$(cmd_$(1))))

# Helper that is non-empty when a prerequisite changes.
# Normally make does this implicitly, but we force rules to always run
# so we can check their command lines.
#   $? -- new prerequisites
#   $| -- order-only dependencies
prereq_changed = $(filter-out $|,$?)

# do_cmd: run a command via the above cmd_foo names, if necessary.
# Should always run for a given target to handle command-line changes.
# Second argument, if non-zero, makes it do asm/C/C++ dependency munging.
# Note: We intentionally do NOT call dirx for depfile, since it contains {SPACE_REPLACEMENT} for
# spaces already and dirx strips the {SPACE_REPLACEMENT} characters.
define do_cmd
$(if $(or $(command_changed),$(prereq_changed)),
  @$(call exact_echo,  $($(quiet)cmd_$(1)))
  @mkdir -p \"$(call dirx,$@)\" \"$(dir $(depfile))\"
  $(if $(findstring flock,$(word 1,$(cmd_$1))),
    @$(cmd_$(1))
    @echo \"  $(quiet_cmd_$(1)): Finished\",
    @$(cmd_$(1))
  )
  @$(call exact_echo,$(call escape_vars,cmd_$(call replace_spaces,$@) := $(cmd_$(1)))) > $(depfile)
  @$(if $(2),$(fixup_dep))
)
endef

# Declare \"all\" target first so it is the default, even though we don't have the
# deps yet.
.PHONY: all
all:

# Use FORCE_DO_CMD to force a target to run.  Should be coupled with
# do_cmd.
.PHONY: FORCE_DO_CMD
FORCE_DO_CMD:

",
        SPACE_REPLACEMENT = SPACE_REPLACEMENT,
    );

    format!("{part_one}{fixup_dep}{commands}{LINK_COMMANDS}\n{escapes}{do_cmd}")
}

const SHARED_FOOTER_HEAD: &str = "\
# \"all\" is a concatenation of the \"all\" targets from all the included
# sub-makefiles. This is just here to clarify.
all:

# Add in dependency-tracking rules.  $(all_deps) is the list of every single
# target in our tree. Only consider the ones with .d (dependency) info:
d_files := $(wildcard $(foreach f,$(all_deps),$(depsdir)/$(f).d))
ifneq ($(d_files),)
  # Rather than include each individual .d file, concatenate them into a
  # single file which make is able to load faster.  We split this into
  # commands that take 1000 files at a time to avoid overflowing the
  # command line.
  $(shell cat $(wordlist 1,1000,$(d_files)) > $(depsdir)/all.deps)
";

const SHARED_FOOTER_TAIL: &str = "\
  # make looks for ways to re-generate included makefiles, but in our case, we
  # don't have a direct way. Explicitly telling make that it has nothing to do
  # for them makes it go faster.
  $(depsdir)/all.deps: ;

  include $(depsdir)/all.deps
endif
";

/// Per-target pattern rules that compile sources into the per-toolset
/// object tree.
fn suffix_rules(extensions: &IndexSet<String>, out: &mut String) {
    let srcdir: &[(&str, &str)] = &[
        ("c", "cc"),
        ("s", "cc"),
        ("S", "cc"),
        ("cpp", "cxx"),
        ("cc", "cxx"),
        ("cxx", "cxx"),
    ];
    let objdir: &[(&str, &str)] = &[("c", "cc"), ("cc", "cxx"), ("cpp", "cxx")];

    out.push_str("# Suffix rules, putting all outputs into $(obj).\n\n");
    for (ext, cmd) in srcdir {
        if extensions.contains(*ext) {
            out.push_str(&format!(
                "$(obj).$(TOOLSET)/$(TARGET)/%.o: $(srcdir)/%.{ext} FORCE_DO_CMD\n\t@$(call do_cmd,{cmd},1)\n\n"
            ));
        }
    }
    out.push_str("# Try building from generated source, too.\n\n");
    for (ext, cmd) in objdir {
        if extensions.contains(*ext) {
            out.push_str(&format!(
                "$(obj).$(TOOLSET)/$(TARGET)/%.o: $(obj).$(TOOLSET)/%.{ext} FORCE_DO_CMD\n\t@$(call do_cmd,{cmd},1)\n\n"
            ));
        }
    }
    for (ext, cmd) in objdir {
        if extensions.contains(*ext) {
            out.push_str(&format!(
                "$(obj).$(TOOLSET)/$(TARGET)/%.o: $(obj)/%.{ext} FORCE_DO_CMD\n\t@$(call do_cmd,{cmd},1)\n\n"
            ));
        }
    }
    out.push_str("# End of this set of suffix rules\n");
}

/// Root-level suffix rules, emitted once per toolset.
fn root_suffix_rules(out: &mut String) {
    let extensions: &[(&str, &str)] = &[
        ("c", "cc"),
        ("cc", "cxx"),
        ("cpp", "cxx"),
        ("cxx", "cxx"),
        ("s", "cc"),
        ("S", "cc"),
    ];
    out.push_str("# Suffix rules, putting all outputs into $(obj).\n");
    for (ext, cmd) in extensions {
        out.push_str(&format!(
            "$(obj).$(TOOLSET)/%.o: $(srcdir)/%.{ext} FORCE_DO_CMD\n\t@$(call do_cmd,{cmd},1)\n"
        ));
    }
    out.push_str("\n# Try building from generated source, too.\n");
    for (ext, cmd) in extensions {
        out.push_str(&format!(
            "$(obj).$(TOOLSET)/%.o: $(obj).$(TOOLSET)/%.{ext} FORCE_DO_CMD\n\t@$(call do_cmd,{cmd},1)\n"
        ));
    }
    out.push('\n');
    for (ext, cmd) in extensions {
        out.push_str(&format!(
            "$(obj).$(TOOLSET)/%.o: $(obj)/%.{ext} FORCE_DO_CMD\n\t@$(call do_cmd,{cmd},1)\n"
        ));
    }
    out.push('\n');
}

fn escape_shell_argument(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn escape_make_variable_expansion(s: &str) -> String {
    s.replace('$', "$$")
}

fn escape_cpp_define(s: &str) -> String {
    escape_make_variable_expansion(&escape_shell_argument(s))
}

fn quote_if_necessary(s: &str) -> String {
    if s.contains('"') {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_owned()
    }
}

/// Convert a string to a value acceptable as a make variable name.
fn make_variable(s: &str) -> String {
    s.replace(' ', "_")
}

pub fn generate(ctx: &GeneratorContext<'_>) -> Result<(), EmitError> {
    let builddir_name = ctx.flags.get("output_dir").unwrap_or("out").to_owned();
    let default_configuration = ctx.default_configuration();

    // With --generator-output the generated files live away from the
    // sources, and every source path gets a $(srcdir)/ prefix.
    let (srcdir, srcdir_prefix) = match &ctx.options.generator_output {
        Some(dir) => (
            paths::to_unix(&paths::relative_path(&ctx.options.depth, dir)),
            "$(srcdir)/",
        ),
        None => (".".to_owned(), ""),
    };

    let mut root = String::new();
    root.push_str(&shared_header(
        &srcdir,
        &builddir_name,
        &default_configuration,
    ));

    let toolsets: IndexSet<SmolStr> = ctx
        .graph
        .flat_list
        .iter()
        .map(|q| q.toolset.clone())
        .collect();
    for toolset in &toolsets {
        root.push_str(&format!("TOOLSET := {toolset}\n"));
        root_suffix_rules(&mut root);
    }

    let needed = ctx.needed_targets();
    let mut target_outputs: IndexMap<QualifiedTarget, String> = IndexMap::new();
    let mut target_link_deps: IndexMap<QualifiedTarget, String> = IndexMap::new();
    let mut include_list: Vec<String> = Vec::new();
    let mut build_files: IndexSet<String> = IndexSet::new();
    let mut num_outputs = 0usize;

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

        let base_path = ctx.base_path(q);
        let mk_name = format!("{}.{}{}.mk", target.name, target.toolset, ctx.options.suffix);
        let mk_rel = if base_path.is_empty() {
            mk_name
        } else {
            format!("{base_path}/{mk_name}")
        };

        let mut writer = FragmentWriter {
            ctx,
            qualified: q,
            target,
            path: base_path,
            srcdir_prefix,
            part_of_all: needed.contains(q),
            target_outputs: &target_outputs,
            target_link_deps: &target_link_deps,
            out: String::new(),
            num_outputs: 0,
            output: String::new(),
            alias: String::new(),
        };
        writer.write()?;
        num_outputs += writer.num_outputs;

        let install_path = writer.installable_target_install_path();
        let output = writer.output.clone();
        ctx.write_file(&ctx.output_path(&mk_rel), &writer.out)?;
        include_list.push(mk_rel);

        // Update the output maps used for cross-target dependency
        // tracking.
        target_outputs.insert(q.clone(), install_path);
        if target.target_type.is_linkable() {
            target_link_deps.insert(q.clone(), output);
        }
    }

    write_sub_makefiles(ctx, &needed, &builddir_name)?;

    // The sorted include list, each wrapped so users can mask a
    // fragment out with NO_LOAD.
    root.push('\n');
    include_list.sort();
    for include_file in &include_list {
        root.push_str(&format!(
            "ifeq ($(strip $(foreach prefix,$(NO_LOAD),\\\n    \
             $(findstring $(join ^,$(prefix)),\\\n                 \
             $(join ^,{include_file})))),)\n"
        ));
        root.push_str(&format!("  include {include_file}\n"));
        root.push_str("endif\n");
    }
    root.push('\n');

    if ctx.flags.get_bool("auto_regeneration", true) {
        let makefile_name = format!("Makefile{}", ctx.options.suffix);
        write_auto_regeneration_rule(ctx, &mut root, &makefile_name, &build_files, srcdir_prefix);
    }

    // Load dependency files in batches of 1000 to keep the command
    // lines bounded.
    root.push_str(SHARED_FOOTER_HEAD);
    let mut start = 1001usize;
    while start < num_outputs {
        let end = start + 999;
        root.push_str(&format!(
            "\n  ifneq ($(word {start},$(d_files)),)\n    \
             $(shell cat $(wordlist {start},{end},$(d_files)) >> $(depsdir)/all.deps)\n  \
             endif"
        ));
        start += 1000;
    }
    let last = ((num_outputs / 1000) + 1) * 1000 + 1;
    root.push_str(&format!(
        "\n  ifneq ($(word {last},$(d_files)),)\n    \
         $(error Found unprocessed dependency files (gypsum didn't generate enough rules!))\n  \
         endif\n"
    ));
    root.push_str(SHARED_FOOTER_TAIL);

    let makefile_name = format!("Makefile{}", ctx.options.suffix);
    ctx.write_file(&ctx.output_path(&makefile_name), &root)
}

fn write_auto_regeneration_rule(
    ctx: &GeneratorContext<'_>,
    root: &mut String,
    makefile_name: &str,
    build_files: &IndexSet<String>,
    srcdir_prefix: &str,
) {
    let mut command: Vec<String> = vec!["gypsum".to_owned(), "-fmake".to_owned()];
    command.extend(ctx.regen_args.iter().cloned());
    for entry in ctx.entry_files {
        command.push(paths::to_unix(&paths::relative_path(
            entry,
            &ctx.options.depth,
        )));
    }
    let deps: Vec<String> = build_files
        .iter()
        .map(|f| format!("{srcdir_prefix}{f}"))
        .collect();
    root.push_str(&format!(
        "quiet_cmd_regen_makefile = ACTION Regenerating $@\n\
         cmd_regen_makefile = {}\n\
         {}: {}\n\
         \t$(call do_cmd,regen_makefile)\n\n",
        encode_shell_list(&command),
        makefile_name,
        deps.join(" "),
    ));
}

/// Small wrapper Makefiles, one per build file, that call the top-level
/// Makefile to build just that file's targets.
fn write_sub_makefiles(
    ctx: &GeneratorContext<'_>,
    needed: &IndexSet<QualifiedTarget>,
    builddir_name: &str,
) -> Result<(), EmitError> {
    for (build_file, _) in ctx.build_files {
        let mut gyp_targets: Vec<String> = Vec::new();
        for q in &ctx.graph.flat_list {
            if &q.build_file == build_file
                && needed.contains(q)
                && !gyp_targets.contains(&q.name.to_string())
            {
                gyp_targets.push(q.name.to_string());
            }
        }
        if gyp_targets.is_empty() {
            continue;
        }

        let rel = paths::to_unix(&paths::relative_path(build_file, &ctx.options.depth));
        let stem = rel
            .rsplit_once('/')
            .map(|(_, f)| f)
            .unwrap_or(&rel)
            .trim_end_matches(".gyp");
        let dir = match rel.rsplit_once('/') {
            Some((dir, _)) => dir.to_owned(),
            None => String::new(),
        };
        let submake_rel = if dir.is_empty() {
            format!("{stem}.Makefile")
        } else {
            format!("{dir}/{stem}.Makefile")
        };

        let up = paths::invert_relative_path(&dir);
        let chdir = if up.is_empty() {
            String::new()
        } else {
            format!(" -C {up}")
        };
        let mut out = String::new();
        out.push_str(HEADER);
        out.push_str(&format!(
            "export builddir_name ?= {}\n",
            if dir.is_empty() {
                builddir_name.to_owned()
            } else {
                format!("{dir}/{builddir_name}")
            }
        ));
        out.push_str(".PHONY: all\n");
        out.push_str("all:\n");
        out.push_str(&format!("\t$(MAKE){chdir} {}\n", gyp_targets.join(" ")));
        ctx.write_file(&ctx.output_path(&submake_rel), &out)?;
    }
    Ok(())
}

/// Writes one target-specific `.mk` fragment.
struct FragmentWriter<'a> {
    ctx: &'a GeneratorContext<'a>,
    qualified: &'a QualifiedTarget,
    target: &'a Target,
    /// Path from source root to the directory holding this target's
    /// build file; empty at the root.
    path: String,
    srcdir_prefix: &'a str,
    part_of_all: bool,
    target_outputs: &'a IndexMap<QualifiedTarget, String>,
    target_link_deps: &'a IndexMap<QualifiedTarget, String>,
    out: String,
    num_outputs: usize,
    output: String,
    alias: String,
}

impl FragmentWriter<'_> {
    fn write(&mut self) -> Result<(), EmitError> {
        self.out.push_str(HEADER);
        self.writeln(&format!("TOOLSET := {}", self.target.toolset));
        self.writeln(&format!("TARGET := {}", self.target.name));
        self.writeln("");

        let (deps, link_deps) = self.compute_deps();

        self.output = self.compute_output();
        self.alias = if self.is_installable() {
            self.output
                .rsplit_once('/')
                .map(|(_, f)| f.to_owned())
                .unwrap_or_else(|| self.output.clone())
        } else {
            self.output.clone()
        };

        let mut extra_outputs: Vec<String> = Vec::new();
        let mut extra_sources: Vec<String> = Vec::new();
        let mut extra_link_deps: Vec<String> = Vec::new();

        // Actions must come first, since they can generate more
        // objects for use below.
        self.write_actions(&mut extra_sources, &mut extra_outputs)?;
        self.write_rules(&mut extra_sources, &mut extra_outputs)?;
        self.write_copies(&mut extra_outputs)?;

        let mut all_sources = self.target.sources.clone();
        all_sources.extend(extra_sources);
        if !all_sources.is_empty() {
            self.write_sources(&deps, &all_sources, &extra_outputs, &mut extra_link_deps)?;

            let extensions: IndexSet<String> = all_sources
                .iter()
                .filter(|s| compile_flavor(s).is_some())
                .filter_map(|s| s.rsplit_once('.').map(|(_, e)| e.to_owned()))
                .collect();
            if !extensions.is_empty() {
                suffix_rules(&extensions, &mut self.out);
                self.writeln("");
            }
        }

        let mut final_link_deps = extra_link_deps;
        final_link_deps.extend(link_deps);
        self.write_target(&deps, &final_link_deps, &extra_outputs)?;
        Ok(())
    }

    fn is_installable(&self) -> bool {
        matches!(
            self.target.target_type,
            TargetType::Executable | TargetType::SharedLibrary | TargetType::LoadableModule
        )
    }

    /// Filenames to put in front of make for building (deps) or
    /// linking (link_deps).
    fn compute_deps(&self) -> (Vec<String>, Vec<String>) {
        let mut deps: Vec<String> = Vec::new();
        let mut link_deps: Vec<String> = Vec::new();
        for dep in &self.target.dependencies {
            if let Some(output) = self.target_outputs.get(dep) {
                if !deps.contains(output) {
                    deps.push(output.clone());
                }
            }
            if let Some(link) = self.target_link_deps.get(dep) {
                if !link_deps.contains(link) {
                    link_deps.push(link.clone());
                }
            }
        }
        for link in &link_deps {
            if !deps.contains(link) {
                deps.push(link.clone());
            }
        }
        (deps, link_deps)
    }

    fn compute_output(&self) -> String {
        let filename = self
            .target
            .output_file_name()
            .expect("settings targets are not written");
        let dir = match self.target.target_type {
            TargetType::Executable => "$(builddir)".to_owned(),
            _ => {
                if self.path.is_empty() {
                    format!("$(obj).{}", self.target.toolset)
                } else {
                    format!("$(obj).{}/{}", self.target.toolset, self.path)
                }
            }
        };
        let dir = self.target.product_dir.clone().unwrap_or(dir);
        format!("{dir}/{filename}")
    }

    fn installable_target_install_path(&self) -> String {
        match self.target.target_type {
            // Install all shared libs into a common directory (per
            // toolset) for convenient access with LD_LIBRARY_PATH.
            TargetType::SharedLibrary => {
                format!("$(builddir)/lib.{}/{}", self.target.toolset, self.alias)
            }
            _ if self.is_installable() => format!("$(builddir)/{}", self.alias),
            _ => self.output.clone(),
        }
    }

    fn write_actions(
        &mut self,
        extra_sources: &mut Vec<String>,
        extra_outputs: &mut Vec<String>,
    ) -> Result<(), EmitError> {
        for action in self.target.actions.clone() {
            let name = format!(
                "{}_{}",
                make_variable(&self.target.name),
                make_variable(&action.name)
            );
            self.writeln(&format!("### Rules for action \"{}\":", action.name));

            let mut dirs: IndexSet<String> = IndexSet::new();
            for out in &action.outputs {
                if let Some((dir, _)) = out.rsplit_once('/') {
                    dirs.insert(dir.to_owned());
                }
            }
            if action.process_outputs_as_sources {
                extra_sources.extend(action.outputs.iter().cloned());
            }

            let mut command = encode_shell_list(&action.command);
            match &action.message {
                Some(message) => {
                    self.writeln(&format!("quiet_cmd_{name} = ACTION {message} $@"));
                }
                None => self.writeln(&format!("quiet_cmd_{name} = ACTION {name} $@")),
            }
            if !dirs.is_empty() {
                command = format!(
                    "mkdir -p {}; {}",
                    dirs.iter().cloned().collect::<Vec<_>>().join(" "),
                    command
                );
            }
            let cd_action = if self.path.is_empty() {
                String::new()
            } else {
                format!("cd {}; ", self.sourceify(&self.path.clone()))
            };
            // Actions may run executables from this build which link
            // against shared libraries from this build.
            self.writeln(&format!(
                "cmd_{name} = export LD_LIBRARY_PATH=$(builddir)/lib.host:\
                 $(builddir)/lib.target:$$LD_LIBRARY_PATH; {cd_action}{command}"
            ));
            self.writeln("");

            let outputs: Vec<String> = action.outputs.iter().map(|o| self.absolutify(o)).collect();
            for path in outputs.iter().chain(&action.inputs) {
                check_path(self.qualified, path)?;
            }
            // The makefile rules are relative to the top dir, but the
            // action commands run in the build-file dir; point obj and
            // builddir at absolute paths for the primary output only.
            self.writeln(&format!("{}: obj := $(abs_obj)", outputs[0]));
            self.writeln(&format!("{}: builddir := $(abs_builddir)", outputs[0]));
            let inputs: Vec<String> = action
                .inputs
                .iter()
                .map(|i| self.sourceify(&self.absolutify(i)))
                .collect();
            self.write_do_cmd(&outputs, &inputs, &name, None)?;

            // Stuff the outputs in a variable so we can refer to them
            // later.
            let outputs_variable = format!("action_{name}_outputs");
            self.writeln(&format!("{} := {}", outputs_variable, outputs.join(" ")));
            extra_outputs.push(format!("$({outputs_variable})"));
            self.writeln("");
        }
        self.writeln("");
        Ok(())
    }

    fn write_rules(
        &mut self,
        extra_sources: &mut Vec<String>,
        extra_outputs: &mut Vec<String>,
    ) -> Result<(), EmitError> {
        for rule in self.target.rules.clone() {
            let name = format!(
                "{}_{}",
                make_variable(&self.target.name),
                make_variable(&rule.name)
            );
            self.writeln(&format!("### Generated for rule {name}:"));

            let mut all_outputs: Vec<String> = Vec::new();
            for (count, rule_source) in rule.rule_sources.iter().enumerate() {
                let basename = rule_source
                    .rsplit_once('/')
                    .map(|(_, f)| f)
                    .unwrap_or(rule_source);
                let root = basename.rsplit_once('.').map(|(r, _)| r).unwrap_or(basename);

                let outputs: Vec<String> = rule
                    .outputs
                    .iter()
                    .map(|o| self.absolutify(&Rule::expand_input_root(o, root)))
                    .collect();
                let mut dirs: IndexSet<String> = IndexSet::new();
                for out in &rule.outputs {
                    let expanded = Rule::expand_input_root(out, root);
                    if let Some((dir, _)) = expanded.rsplit_once('/') {
                        dirs.insert(dir.to_owned());
                    }
                }
                if rule.process_outputs_as_sources {
                    extra_sources
                        .extend(rule.outputs.iter().map(|o| Rule::expand_input_root(o, root)));
                }
                all_outputs.extend(outputs.iter().cloned());

                let mut inputs: Vec<String> = vec![rule_source.clone()];
                inputs.extend(rule.inputs.iter().cloned());
                let inputs: Vec<String> = inputs
                    .iter()
                    .map(|i| self.sourceify(&self.absolutify(i)))
                    .collect();
                for path in outputs.iter().chain(&inputs) {
                    check_path(self.qualified, path)?;
                }

                self.writeln(&format!("{}: obj := $(abs_obj)", outputs[0]));
                self.writeln(&format!("{}: builddir := $(abs_builddir)", outputs[0]));
                let mut rule_inputs = inputs.clone();
                rule_inputs.push("FORCE_DO_CMD".to_owned());
                let actions = vec![format!("$(call do_cmd,{name}_{count})")];
                self.write_make_rule(&outputs, &rule_inputs, Some(&actions), None, false, false);
                self.writeln(&format!("all_deps += {}", outputs.join(" ")));
                self.num_outputs += outputs.len();

                let action: Vec<String> = rule
                    .command
                    .iter()
                    .map(|a| Rule::expand_input_root(a, root))
                    .collect();
                let mkdirs = if dirs.is_empty() {
                    String::new()
                } else {
                    format!("mkdir -p {}; ", dirs.iter().cloned().collect::<Vec<_>>().join(" "))
                };
                let cd_action = if self.path.is_empty() {
                    String::new()
                } else {
                    format!("cd {}; ", self.sourceify(&self.path.clone()))
                };
                self.writeln(&format!(
                    "cmd_{name}_{count} = export LD_LIBRARY_PATH=\
                     $(builddir)/lib.host:$(builddir)/lib.target:$$LD_LIBRARY_PATH; \
                     {cd_action}{mkdirs}{}",
                    encode_shell_list(&action)
                ));
                self.writeln(&format!("quiet_cmd_{name}_{count} = RULE {name}_{count} $@"));
                self.writeln("");
            }

            let outputs_variable = format!("rule_{name}_outputs");
            self.write_list(&all_outputs, &outputs_variable, "", quote_if_necessary);
            extra_outputs.push(format!("$({outputs_variable})"));
            self.writeln(&format!("### Finished generating for rule: {name}"));
            self.writeln("");
        }
        self.writeln("### Finished generating for all rules");
        self.writeln("");
        Ok(())
    }

    fn write_copies(&mut self, extra_outputs: &mut Vec<String>) -> Result<(), EmitError> {
        if self.target.copies.is_empty() {
            return Ok(());
        }
        self.writeln("### Generated for copy rule.");
        let variable = format!("{}_copies", make_variable(&self.target.name));
        let mut outputs: Vec<String> = Vec::new();
        for copy in self.target.copies.clone() {
            for file in &copy.files {
                let path = self.sourceify(&self.absolutify(file));
                let basename = file.rsplit_once('/').map(|(_, f)| f).unwrap_or(file);
                let output =
                    self.sourceify(&self.absolutify(&format!("{}/{}", copy.destination, basename)));
                check_path(self.qualified, &path)?;
                check_path(self.qualified, &output)?;
                self.write_do_cmd(&[output.clone()], &[path], "copy", None)?;
                outputs.push(output);
            }
        }
        self.writeln(&format!("{} = {}", variable, outputs.join(" ")));
        extra_outputs.push(format!("$({variable})"));
        self.writeln("");
        Ok(())
    }

    fn write_sources(
        &mut self,
        deps: &[String],
        all_sources: &[String],
        extra_outputs: &[String],
        extra_link_deps: &mut Vec<String>,
    ) -> Result<(), EmitError> {
        // Write configuration-specific variables for CFLAGS, etc.
        let mut config_names: Vec<&String> = self.target.configurations.keys().collect();
        config_names.sort();
        for configname in config_names {
            let config = self.target.configurations[configname].clone();
            let config = &config;
            let defines = config_list(config, "defines");
            self.write_list(&defines, &format!("DEFS_{configname}"), "-D", escape_cpp_define);

            let cflags = config_list(config, "cflags");
            self.writeln("# Flags passed to all source files.");
            self.write_list(&cflags, &format!("CFLAGS_{configname}"), "", quote_if_necessary);
            let cflags_c = config_list(config, "cflags_c");
            self.writeln("# Flags passed to only C files.");
            self.write_list(&cflags_c, &format!("CFLAGS_C_{configname}"), "", quote_if_necessary);
            let cflags_cc = config_list(config, "cflags_cc");
            self.writeln("# Flags passed to only C++ files.");
            self.write_list(&cflags_cc, &format!("CFLAGS_CC_{configname}"), "", quote_if_necessary);

            let includes: Vec<String> = config_list(config, "include_dirs")
                .iter()
                .map(|i| self.sourceify(&self.absolutify(i)))
                .collect();
            self.write_list(&includes, &format!("INCS_{configname}"), "-I", quote_if_necessary);
        }

        let compilable: Vec<&String> = all_sources
            .iter()
            .filter(|s| compile_flavor(s).is_some())
            .collect();
        for source in all_sources {
            if compile_flavor(source).is_none() && !source.ends_with(".o") && !source.ends_with(".h")
            {
                warn!(
                    target_name = %self.target.name,
                    source, "skipping source with unknown extension"
                );
            }
        }
        let objs: Vec<String> = compilable
            .iter()
            .map(|s| {
                let s = s.as_str();
                let stem = s.rsplit_once('.').map(|(r, _)| r).unwrap_or(s);
                self.objectify(&self.absolutify(&format!("{stem}.o")))
            })
            .collect();
        self.write_list(&objs, "OBJS", "", quote_if_necessary);
        for obj in &objs {
            check_path(self.qualified, obj)?;
        }

        self.writeln("# Add to the list of files we specially track dependencies for.");
        self.writeln("all_deps += $(OBJS)");
        self.num_outputs += objs.len();
        self.writeln("");

        // Make sure our dependencies are built first.
        if !deps.is_empty() {
            self.write_make_rule(
                &["$(OBJS)".to_owned()],
                deps,
                None,
                Some("Make sure our dependencies are built before any of us."),
                true,
                false,
            );
        }

        // Make sure the actions and rules run first. If they generate
        // any extra headers etc., the per-.o file dep tracking will
        // catch the proper rebuilds, so order-only is still ok here.
        if !extra_outputs.is_empty() {
            self.write_make_rule(
                &["$(OBJS)".to_owned()],
                extra_outputs,
                None,
                Some("Make sure our actions/rules run before any of us."),
                true,
                false,
            );
        }

        if !objs.is_empty() {
            extra_link_deps.push("$(OBJS)".to_owned());
            self.writeln("# CFLAGS et al overrides must be target-local.");
            self.writeln("# See \"Target-specific Variable Values\" in the GNU Make manual.");
            self.writeln("$(OBJS): TOOLSET := $(TOOLSET)");
            self.writeln(
                "$(OBJS): GYP_CFLAGS := $(DEFS_$(BUILDTYPE)) $(INCS_$(BUILDTYPE)) \
                 $(CFLAGS_$(BUILDTYPE)) $(CFLAGS_C_$(BUILDTYPE))",
            );
            self.writeln(
                "$(OBJS): GYP_CXXFLAGS := $(DEFS_$(BUILDTYPE)) $(INCS_$(BUILDTYPE)) \
                 $(CFLAGS_$(BUILDTYPE)) $(CFLAGS_CC_$(BUILDTYPE))",
            );
        }

        // If there are any object files in our input file list, link
        // them into our output.
        for source in all_sources {
            if source.ends_with(".o") {
                extra_link_deps.push(self.absolutify(source));
            }
        }

        self.writeln("");
        Ok(())
    }

    fn write_target(
        &mut self,
        deps: &[String],
        link_deps: &[String],
        extra_outputs: &[String],
    ) -> Result<(), EmitError> {
        self.writeln("### Rules for final target.");
        let output = self.output.clone();
        check_path(self.qualified, &output)?;

        if !extra_outputs.is_empty() {
            self.write_make_rule(
                &[output.clone()],
                extra_outputs,
                None,
                Some("Build our special outputs first."),
                true,
                false,
            );
            self.write_make_rule_no_trick(
                extra_outputs,
                deps,
                Some("Preserve order dependency of special output on deps."),
                true,
            );
        }

        if !matches!(self.target.target_type, TargetType::None | TargetType::Settings) {
            let mut config_names: Vec<&String> = self.target.configurations.keys().collect();
            config_names.sort();
            for configname in config_names {
                let ldflags = config_list(&self.target.configurations[configname], "ldflags");
                self.write_list(&ldflags, &format!("LDFLAGS_{configname}"), "", quote_if_necessary);
            }
            let mut libraries = self.target.libraries.clone();
            libraries.dedup();
            self.write_list(&libraries, "LIBS", "", quote_if_necessary);
            self.writeln(&format!("{output}: GYP_LDFLAGS := $(LDFLAGS_$(BUILDTYPE))"));
            self.writeln(&format!("{output}: LIBS := $(LIBS)"));
        }

        match self.target.target_type {
            TargetType::Executable => {
                self.writeln(&format!("{output}: LD_INPUTS := {}", link_deps.join(" ")));
                self.write_do_cmd(&[output.clone()], link_deps, "link", None)?;
            }
            TargetType::StaticLibrary => {
                for link_dep in link_deps {
                    check_path(self.qualified, link_dep)?;
                }
                self.write_do_cmd(&[output.clone()], link_deps, "alink", None)?;
            }
            TargetType::SharedLibrary => {
                self.writeln(&format!("{output}: LD_INPUTS := {}", link_deps.join(" ")));
                self.write_do_cmd(&[output.clone()], link_deps, "solink", None)?;
            }
            TargetType::LoadableModule => {
                for link_dep in link_deps {
                    check_path(self.qualified, link_dep)?;
                }
                self.write_do_cmd(&[output.clone()], link_deps, "solink_module", None)?;
            }
            TargetType::None => {
                // Write a stamp line.
                self.write_do_cmd(&[output.clone()], deps, "touch", None)?;
            }
            TargetType::Settings => {}
        }

        // Add an alias for each target (if there are any outputs).
        // Installable target aliases are created below.
        let target_name = self.target.name.to_string();
        if output != target_name && !self.is_installable() {
            self.write_make_rule(
                &[target_name.clone()],
                &[output.clone()],
                None,
                Some("Add target alias"),
                false,
                true,
            );
            if self.part_of_all {
                self.write_make_rule(
                    &["all".to_owned()],
                    &[target_name.clone()],
                    None,
                    Some("Add target alias to \"all\" target."),
                    false,
                    true,
                );
            }
        }

        // Add special-case rules for our installable targets.
        // 1) They need to install to the build dir or "product" dir.
        // 2) They get shortcuts for building (e.g. "make chrome").
        // 3) They are part of "make all".
        if self.is_installable() {
            let file_desc = if self.target.target_type == TargetType::SharedLibrary {
                "shared library"
            } else {
                "executable"
            };
            let install_path = self.installable_target_install_path();
            check_path(self.qualified, &install_path)?;
            let mut installable_deps = vec![output.clone()];

            self.write_make_rule(
                &[target_name.clone()],
                &[install_path.clone()],
                None,
                Some("Add target alias"),
                false,
                true,
            );
            if install_path != output {
                self.write_do_cmd(
                    &[install_path.clone()],
                    &[output.clone()],
                    "copy",
                    Some(&format!("Copy this to the {file_desc} output path.")),
                )?;
                installable_deps.push(install_path.clone());
            }
            if self.output != self.alias && self.alias != target_name {
                self.write_make_rule(
                    &[self.alias.clone()],
                    &installable_deps,
                    None,
                    Some(&format!("Short alias for building this {file_desc}.")),
                    false,
                    true,
                );
            }
            if self.part_of_all {
                self.write_make_rule(
                    &["all".to_owned()],
                    &[install_path],
                    None,
                    Some(&format!("Add {file_desc} to \"all\" target.")),
                    false,
                    true,
                );
            }
        }
        Ok(())
    }

    /// Write a variable definition that is a list of values, in a
    /// pretty-printed style.
    fn write_list(
        &mut self,
        values: &[String],
        variable: &str,
        prefix: &str,
        quoter: impl Fn(&str) -> String,
    ) {
        self.out.push_str(variable);
        self.out.push_str(" := ");
        if !values.is_empty() {
            let quoted: Vec<String> = values
                .iter()
                .map(|v| quoter(&format!("{prefix}{v}")))
                .collect();
            self.out.push_str(&quoted.join(" \\\n\t"));
        }
        self.out.push_str("\n\n");
    }

    /// Write a rule that uses do_cmd: outputs depend on the command
    /// line that was run, and the V= flag is honored.
    fn write_do_cmd(
        &mut self,
        outputs: &[String],
        inputs: &[String],
        command: &str,
        comment: Option<&str>,
    ) -> Result<(), EmitError> {
        for path in outputs.iter().chain(inputs) {
            if !path.starts_with("$(") {
                check_path(self.qualified, path)?;
            }
        }
        let actions = vec![format!("$(call do_cmd,{command})")];
        self.write_make_rule_full(outputs, inputs, Some(&actions), comment, false, true, false, true);
        // Add our outputs to the list of targets we read depfiles from.
        self.writeln(&format!("all_deps += {}", outputs.join(" ")));
        self.num_outputs += outputs.len();
        Ok(())
    }

    fn write_make_rule(
        &mut self,
        outputs: &[String],
        inputs: &[String],
        actions: Option<&[String]>,
        comment: Option<&str>,
        order_only: bool,
        phony: bool,
    ) {
        self.write_make_rule_full(outputs, inputs, actions, comment, order_only, false, phony, true);
    }

    fn write_make_rule_no_trick(
        &mut self,
        outputs: &[String],
        inputs: &[String],
        comment: Option<&str>,
        order_only: bool,
    ) {
        self.write_make_rule_full(outputs, inputs, None, comment, order_only, false, false, false);
    }

    #[allow(clippy::too_many_arguments)]
    fn write_make_rule_full(
        &mut self,
        outputs: &[String],
        inputs: &[String],
        actions: Option<&[String]>,
        comment: Option<&str>,
        order_only: bool,
        force: bool,
        phony: bool,
        multiple_output_trick: bool,
    ) {
        if let Some(comment) = comment {
            self.writeln(&format!("# {comment}"));
        }
        if phony {
            self.writeln(&format!(".PHONY: {}", outputs.join(" ")));
        }
        let order_insert = if order_only { "| " } else { "" };
        let force_append = if force { " FORCE_DO_CMD" } else { "" };
        if actions.is_some() {
            self.writeln(&format!("{}: TOOLSET := $(TOOLSET)", outputs[0]));
        }
        self.writeln(&format!(
            "{}: {}{}{}",
            outputs[0],
            order_insert,
            inputs.join(" "),
            force_append
        ));
        if let Some(actions) = actions {
            for action in actions {
                self.writeln(&format!("\t{action}"));
            }
        }
        if multiple_output_trick && outputs.len() > 1 {
            // If we have more than one output, a rule like
            //   foo bar: baz
            // means that for *each* output make may run the action,
            // potentially in parallel.  What we want instead is that
            // the action runs once and generates all the files:
            // 1) Write the naive rule that would produce parallel runs
            //    of the action.
            // 2) Serialize the outputs on each other, so we won't start
            //    a parallel run until the first run finishes, at which
            //    point we'll have generated all the outputs.
            self.writeln(&format!("{}: {}", outputs[1..].join(" "), outputs[0]));
            // A dummy command keeps make from considering these
            // outputs unchanged when evaluating dependent rules.
            self.writeln(&format!("{}: ;", outputs[1..].join(" ")));
        }
        self.writeln("");
    }

    fn writeln(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Convert a path to its output directory form.
    fn objectify(&self, path: &str) -> String {
        if path.contains("$(") {
            return path.replace(
                "$(obj)/",
                &format!("$(obj).{}/$(TARGET)/", self.target.toolset),
            );
        }
        format!("$(obj).{}/$(TARGET)/{}", self.target.toolset, path)
    }

    /// Convert a subdirectory-relative path into a base-relative path,
    /// skipping paths that contain make variables.
    fn absolutify(&self, path: &str) -> String {
        if path.contains("$(") {
            return path.to_owned();
        }
        if self.path.is_empty() {
            paths::to_unix(&paths::normalize(std::path::Path::new(path)))
        } else {
            paths::to_unix(&paths::normalize(
                &std::path::Path::new(&self.path).join(path),
            ))
        }
    }

    /// Convert a path to its source directory form.
    fn sourceify(&self, path: &str) -> String {
        if path.contains("$(") || path.starts_with('/') {
            return path.to_owned();
        }
        format!("{}{}", self.srcdir_prefix, path)
    }
}

fn config_list(config: &Dict, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::string_list)
        .unwrap_or_default()
}
