//! End-to-end generation scenarios over a mock filesystem: load,
//! resolve, and emit, then inspect the generated build files.

use std::path::PathBuf;

use gypsum::{Dict, Format, GenerateConfig, GeneratorFlags, Value};

use test_log::test;

use crate::mock::MockWorld;

mod mock;

fn run(
    world: &MockWorld,
    format: Format,
    entries: &[&str],
    defines: &[(&str, Value)],
    flags: &[&str],
) -> Result<(), gypsum::Error> {
    let mut define_dict = Dict::new();
    for (name, value) in defines {
        define_dict.insert((*name).to_owned(), value.clone());
    }
    let config = GenerateConfig {
        format,
        build_files: entries.iter().map(PathBuf::from).collect(),
        defines: define_dict,
        includes: vec![],
        depth: PathBuf::from("/src"),
        generator_flags: GeneratorFlags::parse(
            &flags.iter().map(|f| (*f).to_owned()).collect::<Vec<_>>(),
        ),
        suffix: String::new(),
        generator_output: None,
        regen_args: vec![],
    };
    gypsum::generate(&config, world)
}

fn file(world: &MockWorld, path: &str) -> String {
    world
        .file(path)
        .unwrap_or_else(|| panic!("expected {path} to be generated"))
}

const ACTIONS_GYP: &str = "\
{
  'targets': [
    {
      'target_name': 'program',
      'type': 'executable',
      'sources': ['program.c'],
      'actions': [
        {
          'action_name': 'make_prog1',
          'inputs': ['make-prog1.py'],
          'outputs': ['gen/prog1.c'],
          'action': ['python', 'make-prog1.py', 'gen/prog1.c'],
          'process_outputs_as_sources': 1,
        },
        {
          'action_name': 'make_prog2',
          'inputs': ['make-prog2.py'],
          'outputs': ['gen/prog2.c'],
          'action': ['python', 'make-prog2.py', 'gen/prog2.c'],
          'process_outputs_as_sources': 1,
        },
      ],
    },
    {
      'target_name': 'make_file',
      'type': 'none',
      'actions': [
        {
          'action_name': 'file_out',
          'inputs': ['make-file.py'],
          'outputs': ['subdir2/file.out'],
          'action': ['python', 'make-file.py', 'subdir2/file.out'],
        },
      ],
    },
  ],
}
";

fn actions_world() -> MockWorld {
    let world = MockWorld::new();
    world.add_file("/src/actions.gyp", ACTIONS_GYP);
    world
}

#[test]
fn make_emits_actions_before_compiles_before_link() {
    let world = actions_world();
    run(&world, Format::Make, &["/src/actions.gyp"], &[], &[]).unwrap();

    let root = file(&world, "/src/Makefile");
    assert!(root.contains("include program.target.mk"));
    assert!(root.contains("include make_file.target.mk"));
    assert!(root.contains("BUILDTYPE ?= Default"));

    let program = file(&world, "/src/program.target.mk");
    assert!(program.contains("TOOLSET := target"));
    assert!(program.contains("TARGET := program"));
    // Both actions are present with their command lines recorded.
    assert!(program.contains("quiet_cmd_program_make_prog1 = ACTION program_make_prog1 $@"));
    assert!(program.contains("cmd_program_make_prog2"));
    // Generated sources join the compile set.
    assert!(program.contains("$(obj).target/$(TARGET)/gen/prog1.o"));
    assert!(program.contains("$(obj).target/$(TARGET)/gen/prog2.o"));
    // Objects wait for actions through an order-only edge.
    assert!(program.contains("$(OBJS): | $(action_program_make_prog1_outputs)"));
    // Compilation precedes link; the binary links the objects.
    assert!(program.contains("$(builddir)/program: LD_INPUTS := $(OBJS)"));
    assert!(program.contains("$(call do_cmd,link)"));
    assert!(program.contains("all: $(builddir)/program"));

    // The actions-only target stamps itself after its action runs.
    let make_file = file(&world, "/src/make_file.target.mk");
    assert!(make_file.contains("cmd_make_file_file_out"));
    assert!(make_file.contains("subdir2/file.out"));
    assert!(make_file.contains("$(obj).target/make_file.stamp"));
    assert!(make_file.contains("$(call do_cmd,touch)"));
}

#[test]
fn ninja_emits_subninjas_stamps_and_all() {
    let world = actions_world();
    run(&world, Format::Ninja, &["/src/actions.gyp"], &[], &[]).unwrap();

    let master = file(&world, "/src/out/Default/build.ninja");
    assert!(master.contains("rule cc"));
    assert!(master.contains("rule alink"));
    assert!(master.contains("subninja obj/program.target.ninja"));
    assert!(master.contains("subninja obj/make_file.target.ninja"));
    assert!(master.contains("build all: phony || program obj/target/make_file.stamp"));

    let program = file(&world, "/src/out/Default/obj/program.target.ninja");
    // Action rules are target-qualified and run from the base dir.
    assert!(program.contains("rule program.make_prog1"));
    assert!(program.contains("cd ../..; python make-prog1.py gen/prog1.c"));
    // Multiple action outputs collapse into one stamp that the compile
    // edges order after.
    assert!(program.contains("build obj/target/program.actions_rules_copies.stamp: stamp"));
    let compile_line = program
        .lines()
        .position(|l| l.starts_with("build obj/target/program.program.o: cc"))
        .expect("compile edge for program.c");
    let joined = program.lines().skip(compile_line).take(2).collect::<String>();
    assert!(joined.contains("||"), "{joined}");
    assert!(program.contains("build program: link"));

    let make_file = file(&world, "/src/out/Default/obj/make_file.target.ninja");
    assert!(make_file.contains("build obj/target/make_file.stamp: stamp"));
}

#[test]
fn regeneration_rule_is_optional() {
    let world = actions_world();
    run(&world, Format::Make, &["/src/actions.gyp"], &[], &[]).unwrap();
    let root = file(&world, "/src/Makefile");
    assert!(root.contains("cmd_regen_makefile = gypsum -fmake actions.gyp"));
    assert!(root.contains("Makefile: actions.gyp"));

    let world = actions_world();
    run(
        &world,
        Format::Make,
        &["/src/actions.gyp"],
        &[],
        &["auto_regeneration=0"],
    )
    .unwrap();
    let root = file(&world, "/src/Makefile");
    assert!(!root.contains("regen_makefile"));

    let world = actions_world();
    run(
        &world,
        Format::Ninja,
        &["/src/actions.gyp"],
        &[],
        &["auto_regeneration=0"],
    )
    .unwrap();
    let master = file(&world, "/src/out/Default/build.ninja");
    assert!(!master.contains("gyp_regen"));
}

const LIBRARY_GYP: &str = "\
{
  'targets': [
    {
      'target_name': 'program',
      'type': 'executable',
      'sources': ['program.c'],
      'dependencies': ['lib1', 'lib2'],
    },
    {
      'target_name': 'lib1',
      'type': 'static_library',
      'sources': ['lib1.c'],
      'conditions': [
        ['moveable_function==\"lib1\"', {'sources': ['lib1_moveable.c']}],
      ],
    },
    {
      'target_name': 'lib2',
      'type': 'static_library',
      'sources': ['lib2.c'],
      'conditions': [
        ['moveable_function==\"lib2\"', {'sources': ['lib2_moveable.c']}],
      ],
    },
  ],
}
";

#[test]
fn moveable_function_follows_the_variable() {
    let world = MockWorld::new();
    world.add_file("/src/library.gyp", LIBRARY_GYP);
    run(
        &world,
        Format::Make,
        &["/src/library.gyp"],
        &[("moveable_function", Value::from("lib1"))],
        &[],
    )
    .unwrap();

    let lib1 = file(&world, "/src/lib1.target.mk");
    let lib2 = file(&world, "/src/lib2.target.mk");
    assert!(lib1.contains("lib1_moveable.o"));
    assert!(!lib2.contains("lib2_moveable.o"));

    // Executables link both archives; archive names snip the extra lib.
    let program = file(&world, "/src/program.target.mk");
    assert!(program.contains("$(obj).target/lib1.a"));
    assert!(program.contains("$(obj).target/lib2.a"));
    assert!(program.contains("LD_INPUTS := $(OBJS) $(obj).target/lib1.a $(obj).target/lib2.a"));

    // Flipping the variable moves the file to the other library.
    let world = MockWorld::new();
    world.add_file("/src/library.gyp", LIBRARY_GYP);
    run(
        &world,
        Format::Make,
        &["/src/library.gyp"],
        &[("moveable_function", Value::from("lib2"))],
        &[],
    )
    .unwrap();
    let lib1 = file(&world, "/src/lib1.target.mk");
    let lib2 = file(&world, "/src/lib2.target.mk");
    assert!(!lib1.contains("lib1_moveable.o"));
    assert!(lib2.contains("lib2_moveable.o"));
}

#[test]
fn target_conditions_can_introduce_dependency_edges() {
    let world = MockWorld::new();
    world.add_file(
        "/src/late.gyp",
        "\
{
  'targets': [
    {
      'target_name': 'prog',
      'type': 'executable',
      'sources': ['main.c'],
      'target_conditions': [
        ['1', {'dependencies': ['helper']}],
      ],
    },
    {
      'target_name': 'helper',
      'type': 'static_library',
      'sources': ['helper.c'],
    },
  ],
}
",
    );
    run(&world, Format::Make, &["/src/late.gyp"], &[], &[]).unwrap();

    // The late edge behaves like a declared one: the helper fragment
    // is emitted first, and its archive reaches the link line.
    let written = world.written();
    let position = |name: &str| {
        written
            .iter()
            .position(|p| p.ends_with(name))
            .unwrap_or_else(|| panic!("expected {name} to be generated"))
    };
    assert!(position("helper.target.mk") < position("prog.target.mk"));
    let prog = file(&world, "/src/prog.target.mk");
    assert!(prog.contains("LD_INPUTS := $(OBJS) $(obj).target/libhelper.a"));
}

#[test]
fn dependency_cycle_aborts_generation() {
    let world = MockWorld::new();
    world.add_file(
        "/src/a.gyp",
        "{'targets': [{'target_name': 'A', 'type': 'none', 'dependencies': ['b.gyp:B']}]}",
    );
    world.add_file(
        "/src/b.gyp",
        "{'targets': [{'target_name': 'B', 'type': 'none', 'dependencies': ['a.gyp:A']}]}",
    );
    let err = run(&world, Format::Make, &["/src/a.gyp"], &[], &[]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cycle"), "{message}");
    assert!(message.contains("a.gyp:A#target"), "{message}");
    assert!(message.contains("b.gyp:B#target"), "{message}");
    // No root Makefile is published on a fatal error.
    assert!(world.file("/src/Makefile").is_none());
}

#[test]
fn toolsets_get_separate_object_trees_and_outputs() {
    let world = MockWorld::new();
    world.add_file(
        "/src/tool.gyp",
        "\
{
  'targets': [
    {
      'target_name': 'gen_tool',
      'type': 'static_library',
      'toolset': 'host',
      'sources': ['tool.c'],
    },
    {
      'target_name': 'prog',
      'type': 'executable',
      'sources': ['main.c'],
      'dependencies': ['gen_tool#host'],
    },
  ],
}
",
    );
    run(&world, Format::Make, &["/src/tool.gyp"], &[], &[]).unwrap();

    let tool = file(&world, "/src/gen_tool.host.mk");
    let prog = file(&world, "/src/prog.target.mk");
    assert!(tool.contains("TOOLSET := host"));
    assert!(tool.contains("$(obj).host/$(TARGET)/tool.o"));
    assert!(tool.contains("$(obj).host/libgen_tool.a"));
    assert!(prog.contains("TOOLSET := target"));
    assert!(prog.contains("$(obj).target/$(TARGET)/main.o"));
    assert!(prog.contains("$(obj).host/libgen_tool.a"));

    let world = MockWorld::new();
    world.add_file(
        "/src/tool.gyp",
        "\
{
  'targets': [
    {
      'target_name': 'gen_tool',
      'type': 'static_library',
      'toolset': 'host',
      'sources': ['tool.c'],
    },
    {
      'target_name': 'prog',
      'type': 'executable',
      'sources': ['main.c'],
      'dependencies': ['gen_tool#host'],
    },
  ],
}
",
    );
    run(&world, Format::Ninja, &["/src/tool.gyp"], &[], &[]).unwrap();
    let tool = file(&world, "/src/out/Default/obj/gen_tool.host.ninja");
    let prog = file(&world, "/src/out/Default/obj/prog.target.ninja");
    assert!(tool.contains("obj/host/gen_tool.tool.o"));
    assert!(prog.contains("obj/target/prog.main.o"));
}

#[test]
fn generation_is_deterministic() {
    let first = actions_world();
    run(&first, Format::Make, &["/src/actions.gyp"], &[], &[]).unwrap();
    let second = actions_world();
    run(&second, Format::Make, &["/src/actions.gyp"], &[], &[]).unwrap();

    let written = first.written();
    assert_eq!(written, second.written());
    for path in written {
        assert_eq!(first.file(&path), second.file(&path), "{}", path.display());
    }
}

#[test]
fn settings_targets_propagate_flags_but_emit_nothing() {
    let world = MockWorld::new();
    world.add_file(
        "/src/flags.gyp",
        "\
{
  'targets': [
    {
      'target_name': 'flags',
      'type': 'settings',
      'direct_dependent_settings': {'defines': ['USE_FLAGS']},
    },
    {
      'target_name': 'app',
      'type': 'executable',
      'sources': ['app.c'],
      'dependencies': ['flags'],
    },
  ],
}
",
    );
    run(&world, Format::Make, &["/src/flags.gyp"], &[], &[]).unwrap();
    assert!(world.file("/src/flags.target.mk").is_none());
    let app = file(&world, "/src/app.target.mk");
    assert!(app.contains("USE_FLAGS"));
}

#[test]
fn command_substitution_feeds_emitted_settings() {
    let world = MockWorld::new();
    world.add_command("echo 1.2.3", "1.2.3\n");
    world.add_file(
        "/src/ver.gyp",
        "\
{
  'targets': [
    {
      'target_name': 'app',
      'type': 'executable',
      'sources': ['app.c'],
      'defines': ['VERSION=<!(echo 1.2.3)'],
    },
  ],
}
",
    );
    run(&world, Format::Make, &["/src/ver.gyp"], &[], &[]).unwrap();
    assert_eq!(world.take_log(), vec!["echo 1.2.3".to_owned()]);
    let app = file(&world, "/src/app.target.mk");
    assert!(app.contains("VERSION=1.2.3"));
}

#[test]
fn included_files_join_the_regeneration_edge() {
    let world = MockWorld::new();
    world.add_file(
        "/src/app.gyp",
        "{'includes': ['common.gypi'],
          'targets': [{'target_name': 'app', 'type': 'executable', 'sources': ['app.c']}]}",
    );
    world.add_file("/src/common.gypi", "{'variables': {'v': 1}}");
    run(&world, Format::Make, &["/src/app.gyp"], &[], &[]).unwrap();
    let root = file(&world, "/src/Makefile");
    assert!(root.contains("Makefile: app.gyp common.gypi"));
}

#[test]
fn copies_become_copy_edges() {
    let world = MockWorld::new();
    world.add_file(
        "/src/copy.gyp",
        "\
{
  'targets': [
    {
      'target_name': 'stuff',
      'type': 'none',
      'copies': [
        {'destination': 'out_dir', 'files': ['data/a.txt', 'data/b.txt']},
      ],
    },
  ],
}
",
    );
    run(&world, Format::Make, &["/src/copy.gyp"], &[], &[]).unwrap();
    let stuff = file(&world, "/src/stuff.target.mk");
    assert!(stuff.contains("$(call do_cmd,copy)"));
    assert!(stuff.contains("out_dir/a.txt"));
    assert!(stuff.contains("out_dir/b.txt"));
}

#[test]
fn scons_emits_sconscripts_and_wrapper() {
    let world = MockWorld::new();
    world.add_file("/src/library.gyp", LIBRARY_GYP);
    run(
        &world,
        Format::Scons,
        &["/src/library.gyp"],
        &[("moveable_function", Value::from("lib1"))],
        &[],
    )
    .unwrap();

    let program = file(&world, "/src/program.scons");
    assert!(program.contains("Import(\"env\")"));
    assert!(program.contains("env.Program('program', input_files)"));
    // Dependent static libraries fold into LIBS.
    assert!(program.contains("'lib1'"));
    assert!(program.contains("Alias('gyp_target_lib1')"));
    assert!(program.contains("Return(\"gyp_target\")"));

    let lib1 = file(&world, "/src/lib1.scons");
    assert!(lib1.contains("env.StaticLibrary('lib1', input_files)"));
    assert!(lib1.contains("'lib1_moveable.c'"));

    let wrapper = file(&world, "/src/library_main.scons");
    assert!(wrapper.contains("'lib1.scons'"));
    assert!(wrapper.contains("'program.scons'"));
    assert!(wrapper.contains("Default(Alias('library', target_alias_list))"));
}

#[test]
fn spaces_in_paths_are_rejected() {
    let world = MockWorld::new();
    world.add_file(
        "/src/sp.gyp",
        "{'targets': [{'target_name': 'app', 'type': 'executable',
                       'sources': ['my file.c']}]}",
    );
    let err = run(&world, Format::Make, &["/src/sp.gyp"], &[], &[]).unwrap_err();
    assert!(err.to_string().contains("space"), "{err}");
}
