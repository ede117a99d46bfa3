//! The embedded expression mini-language.
//!
//! Strings anywhere in the loaded tree may contain substitution forms:
//!
//! - `<(NAME)` / `<@(NAME)` — early variable substitution (definition
//!   time), scalar and list flavor;
//! - `>(NAME)` / `>@(NAME)` — late variable substitution (resolution
//!   time, after merging);
//! - `<!(cmd)` / `<!@(cmd)` — command substitution via a shell, trimmed
//!   stdout, with `@` splitting on whitespace into a list;
//! - `<|(NAME contents)` — file-backed list construction: writes
//!   `contents` to NAME and expands to NAME;
//! - `conditions` / `target_conditions` keys holding
//!   `[condition, then_dict, else_dict?]` entries, merged into the
//!   enclosing dict when their phase runs.
//!
//! [`evaluate`] drives one phase to a fixpoint: a second call on its own
//! output is a no-op.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::merge::{self, MergeError};
use crate::value::{Dict, Value};
use crate::world::World;

pub mod cond;

/// Which substitution family is live. Conditions under `conditions`
/// evaluate early; `target_conditions` evaluate late. The late phase
/// also finishes any early forms introduced by late merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Early,
    Late,
}

pub struct ExpandContext<'a> {
    pub world: &'a dyn World,
    /// The build file this tree came from, for error context.
    pub file: &'a Path,
    /// Directory of the build file; working directory for `<!(…)`.
    pub base_dir: &'a Path,
    pub phase: Phase,
}

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("{file}: unbalanced parentheses in {text:?} at {path}")]
    UnbalancedParens {
        file: PathBuf,
        path: String,
        text: String,
    },

    #[error("{file}: unknown variable {name:?} at {path}")]
    UnknownVariable {
        file: PathBuf,
        path: String,
        name: String,
    },

    #[error("{file}: circular variable reference through {name:?} at {path}")]
    CircularReference {
        file: PathBuf,
        path: String,
        name: String,
    },

    #[error("{file}: variable {name:?} holds a {kind} and cannot be spliced into a string at {path}")]
    Unsplicable {
        file: PathBuf,
        path: String,
        name: String,
        kind: &'static str,
    },

    #[error("{file}: command `{command}` exited with status {status} at {path}: {stderr}")]
    CommandFailed {
        file: PathBuf,
        path: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("{file}: failed to run `{command}` at {path}: {source}")]
    CommandIo {
        file: PathBuf,
        path: String,
        command: String,
        source: std::io::Error,
    },

    #[error("{file}: malformed list-construction form {text:?} at {path}")]
    MalformedListForm {
        file: PathBuf,
        path: String,
        text: String,
    },

    #[error("{file}: condition error at {path}: {source}")]
    Condition {
        file: PathBuf,
        path: String,
        source: cond::CondError,
    },

    #[error("{file}: malformed conditions entry at {path}: expected [condition, dict, dict?]")]
    MalformedCondition { file: PathBuf, path: String },

    #[error("{file}: merge error at {path}: {source}")]
    Merge {
        file: PathBuf,
        path: String,
        source: MergeError,
    },

    #[error("{file}: expression evaluation did not converge (circular conditions?)")]
    NoConvergence { file: PathBuf },
}

const MAX_PASSES: usize = 100;

/// Evaluate a tree to a fixpoint for the context's phase.
#[tracing::instrument(skip_all, fields(file = %cx.file.display(), phase = ?cx.phase))]
pub fn evaluate(dict: &mut Dict, scope: &Dict, cx: &ExpandContext<'_>) -> Result<(), ExpandError> {
    for pass in 0..MAX_PASSES {
        let before = dict.clone();
        process_dict(dict, scope, cx, "")?;
        if *dict == before {
            debug!(passes = pass + 1, "expansion reached fixpoint");
            return Ok(());
        }
    }
    Err(ExpandError::NoConvergence {
        file: cx.file.to_path_buf(),
    })
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

/// One pass over a dict: bind its `variables`, expand values and keys,
/// then merge the current phase's conditions.
fn process_dict(
    dict: &mut Dict,
    scope: &Dict,
    cx: &ExpandContext<'_>,
    path: &str,
) -> Result<(), ExpandError> {
    // A `variables` section extends the scope for this subtree. Raw
    // entries are visible to each other before their own expansion so
    // declaration order inside the section does not matter.
    let mut local_storage;
    let local: &Dict = if let Some(Value::Dict(vars)) = dict.get("variables") {
        local_storage = scope.clone();
        for (k, v) in vars {
            local_storage.insert(k.clone(), v.clone());
        }
        let keys: Vec<String> = vars.keys().cloned().collect();
        for key in keys {
            let var_path = child_path(&child_path(path, "variables"), &key);
            let mut value = local_storage[&key].clone();
            expand_in_place(&mut value, &local_storage, cx, &var_path)?;
            local_storage.insert(key.clone(), value.clone());
            if let Some(Value::Dict(vars)) = dict.get_mut("variables") {
                vars.insert(key, value);
            }
        }
        &local_storage
    } else {
        scope
    };

    // Keys themselves may carry substitutions.
    let needs_rename = dict
        .keys()
        .any(|k| find_marker(k, cx.phase).is_some());
    if needs_rename {
        let mut renamed = Dict::new();
        for (key, value) in std::mem::take(dict) {
            let new_key = match find_marker(&key, cx.phase) {
                Some(_) => {
                    let expanded =
                        expand_string(&key, local, cx, &child_path(path, &key), &mut Vec::new())?;
                    expanded.to_plain_string().unwrap_or(key)
                }
                None => key,
            };
            renamed.insert(new_key, value);
        }
        *dict = renamed;
    }

    let skip = ["variables", "conditions", "target_conditions"];
    let keys: Vec<String> = dict.keys().cloned().collect();
    for key in &keys {
        if skip.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = dict.get_mut(key) {
            let mut taken = std::mem::replace(value, Value::Bool(false));
            let result = expand_in_place(&mut taken, local, cx, &child_path(path, key));
            if let Some(slot) = dict.get_mut(key) {
                *slot = taken;
            }
            result?;
        }
    }

    let cond_key = match cx.phase {
        Phase::Early => "conditions",
        Phase::Late => "target_conditions",
    };
    if let Some(conditions) = dict.shift_remove(cond_key) {
        let cond_path = child_path(path, cond_key);
        let entries = conditions
            .as_list()
            .ok_or_else(|| ExpandError::MalformedCondition {
                file: cx.file.to_path_buf(),
                path: cond_path.clone(),
            })?;
        for entry in entries {
            let branch = select_branch(entry, local, cx, &cond_path)?;
            if let Some(branch) = branch {
                merge::merge_dict(dict, branch, path).map_err(|source| ExpandError::Merge {
                    file: cx.file.to_path_buf(),
                    path: cond_path.clone(),
                    source,
                })?;
            }
        }
    }

    Ok(())
}

fn select_branch<'v>(
    entry: &'v Value,
    scope: &Dict,
    cx: &ExpandContext<'_>,
    path: &str,
) -> Result<Option<&'v Dict>, ExpandError> {
    let malformed = || ExpandError::MalformedCondition {
        file: cx.file.to_path_buf(),
        path: path.to_owned(),
    };
    let parts = entry.as_list().ok_or_else(malformed)?;
    let (condition, then_branch, else_branch) = match parts {
        [Value::Str(c), Value::Dict(t)] => (c, t, None),
        [Value::Str(c), Value::Dict(t), Value::Dict(e)] => (c, t, Some(e)),
        _ => return Err(malformed()),
    };
    let holds = cond::evaluate(condition, scope).map_err(|source| ExpandError::Condition {
        file: cx.file.to_path_buf(),
        path: path.to_owned(),
        source,
    })?;
    debug!(condition, holds, "evaluated condition");
    Ok(if holds { Some(then_branch) } else { else_branch })
}

fn expand_in_place(
    value: &mut Value,
    scope: &Dict,
    cx: &ExpandContext<'_>,
    path: &str,
) -> Result<(), ExpandError> {
    match value {
        Value::Str(s) => {
            if find_marker(s, cx.phase).is_some() {
                *value = expand_string(s, scope, cx, path, &mut Vec::new())?;
            }
        }
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, mut item) in std::mem::take(items).into_iter().enumerate() {
                expand_in_place(&mut item, scope, cx, &format!("{path}[{i}]"))?;
                match item {
                    // A list-valued expansion splices into its parent.
                    Value::List(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            *items = out;
        }
        Value::Dict(sub) => process_dict(sub, scope, cx, path)?,
        Value::Int(_) | Value::Bool(_) => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Variable,
    VariableList,
    Command,
    CommandList,
    FileList,
    LateVariable,
    LateVariableList,
}

/// All substitution prefixes. No prefix is a prefix of another at the
/// same position, so the earliest match is unambiguous.
const FORMS: &[(&str, Form)] = &[
    ("<!@(", Form::CommandList),
    ("<!(", Form::Command),
    ("<@(", Form::VariableList),
    ("<|(", Form::FileList),
    ("<(", Form::Variable),
    (">@(", Form::LateVariableList),
    (">(", Form::LateVariable),
];

fn enabled(form: Form, phase: Phase) -> bool {
    match form {
        Form::LateVariable | Form::LateVariableList => phase == Phase::Late,
        // Late merges may introduce early forms; the late phase
        // finishes them so nothing unresolved survives.
        _ => true,
    }
}

fn find_marker(s: &str, phase: Phase) -> Option<(usize, &'static str, Form)> {
    let mut best: Option<(usize, &'static str, Form)> = None;
    for &(prefix, form) in FORMS {
        if !enabled(form, phase) {
            continue;
        }
        if let Some(pos) = s.find(prefix) {
            if best.is_none_or(|(b, _, _)| pos < b) {
                best = Some((pos, prefix, form));
            }
        }
    }
    best
}

/// Find the index of the `)` matching the one opened just before
/// `start`, honoring nesting.
fn matching_paren(s: &str, start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s[start..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn expand_string(
    s: &str,
    scope: &Dict,
    cx: &ExpandContext<'_>,
    path: &str,
    var_stack: &mut Vec<String>,
) -> Result<Value, ExpandError> {
    let mut out = String::new();
    let mut rest = s;

    while let Some((pos, prefix, form)) = find_marker(rest, cx.phase) {
        let inner_start = pos + prefix.len();
        let close = matching_paren(rest, inner_start).ok_or_else(|| {
            ExpandError::UnbalancedParens {
                file: cx.file.to_path_buf(),
                path: path.to_owned(),
                text: s.to_owned(),
            }
        })?;

        // The contents of the form may itself contain substitutions.
        let raw_inner = &rest[inner_start..close];
        let inner = match expand_string(raw_inner, scope, cx, path, var_stack)? {
            Value::Str(s) => s,
            other => other.to_plain_string().unwrap_or_default(),
        };

        let whole = out.is_empty() && pos == 0 && close == rest.len() - 1;
        let replacement = apply_form(form, &inner, scope, cx, path, var_stack)?;

        if whole {
            return finish_whole(replacement, scope, cx, path, var_stack);
        }

        out.push_str(&rest[..pos]);
        out.push_str(&splice(&replacement, &inner, cx, path)?);
        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    Ok(Value::Str(out))
}

/// A form that spans the entire string keeps its typed value: lists stay
/// lists and integers stay integers.
fn finish_whole(
    replacement: Value,
    scope: &Dict,
    cx: &ExpandContext<'_>,
    path: &str,
    var_stack: &mut Vec<String>,
) -> Result<Value, ExpandError> {
    match replacement {
        // Replacement text may still contain substitutions (a variable
        // defined in terms of another one).
        Value::Str(s) if find_marker(&s, cx.phase).is_some() => {
            expand_string(&s, scope, cx, path, var_stack)
        }
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for mut item in items {
                if let Value::Str(s) = &item {
                    if find_marker(s, cx.phase).is_some() {
                        item = expand_string(s, scope, cx, path, var_stack)?;
                    }
                }
                out.push(item);
            }
            Ok(Value::List(out))
        }
        other => Ok(other),
    }
}

fn splice(
    replacement: &Value,
    name: &str,
    cx: &ExpandContext<'_>,
    path: &str,
) -> Result<String, ExpandError> {
    match replacement {
        Value::List(items) => {
            let parts: Option<Vec<String>> = items.iter().map(|v| v.to_plain_string()).collect();
            parts.map(|p| p.join(" ")).ok_or_else(|| ExpandError::Unsplicable {
                file: cx.file.to_path_buf(),
                path: path.to_owned(),
                name: name.to_owned(),
                kind: "list of non-scalars",
            })
        }
        other => other.to_plain_string().ok_or_else(|| ExpandError::Unsplicable {
            file: cx.file.to_path_buf(),
            path: path.to_owned(),
            name: name.to_owned(),
            kind: other.kind(),
        }),
    }
}

fn apply_form(
    form: Form,
    inner: &str,
    scope: &Dict,
    cx: &ExpandContext<'_>,
    path: &str,
    var_stack: &mut Vec<String>,
) -> Result<Value, ExpandError> {
    match form {
        Form::Variable | Form::VariableList | Form::LateVariable | Form::LateVariableList => {
            let name = inner.trim();
            if var_stack.iter().any(|n| n == name) {
                return Err(ExpandError::CircularReference {
                    file: cx.file.to_path_buf(),
                    path: path.to_owned(),
                    name: name.to_owned(),
                });
            }
            let value = scope.get(name).ok_or_else(|| ExpandError::UnknownVariable {
                file: cx.file.to_path_buf(),
                path: path.to_owned(),
                name: name.to_owned(),
            })?;
            var_stack.push(name.to_owned());
            let result = match value {
                Value::Str(s) if find_marker(s, cx.phase).is_some() => {
                    expand_string(s, scope, cx, path, var_stack)?
                }
                other => other.clone(),
            };
            var_stack.pop();
            Ok(result)
        }
        Form::Command | Form::CommandList => {
            let output = run_command(inner, cx, path)?;
            if form == Form::CommandList {
                Ok(Value::List(
                    output.split_whitespace().map(Value::from).collect(),
                ))
            } else {
                Ok(Value::Str(output))
            }
        }
        Form::FileList => {
            let (name, contents) =
                inner
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| ExpandError::MalformedListForm {
                        file: cx.file.to_path_buf(),
                        path: path.to_owned(),
                        text: inner.to_owned(),
                    })?;
            let target = cx.base_dir.join(name);
            let mut body = contents.trim().to_owned();
            body.push('\n');
            cx.world
                .write_file(&target, &body)
                .map_err(|source| ExpandError::CommandIo {
                    file: cx.file.to_path_buf(),
                    path: path.to_owned(),
                    command: format!("write {}", target.display()),
                    source,
                })?;
            Ok(Value::Str(name.to_owned()))
        }
    }
}

fn run_command(command: &str, cx: &ExpandContext<'_>, path: &str) -> Result<String, ExpandError> {
    debug!(command, cwd = %cx.base_dir.display(), "command substitution");
    let result = cx
        .world
        .run_command(cx.base_dir, command)
        .map_err(|source| ExpandError::CommandIo {
            file: cx.file.to_path_buf(),
            path: path.to_owned(),
            command: command.to_owned(),
            source,
        })?;
    if result.status != 0 {
        return Err(ExpandError::CommandFailed {
            file: cx.file.to_path_buf(),
            path: path.to_owned(),
            command: command.to_owned(),
            status: result.status,
            stderr: result.stderr.trim_end().to_owned(),
        });
    }
    Ok(result.stdout.trim_end().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_dict;
    use crate::world::{CommandResult, World};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned command outputs and captured writes; everything else is
    /// unreachable from expansion.
    #[derive(Default)]
    struct ScriptedWorld {
        commands: HashMap<String, CommandResult>,
        writes: Mutex<Vec<(PathBuf, String)>>,
    }

    impl ScriptedWorld {
        fn with_command(mut self, cmd: &str, stdout: &str) -> Self {
            self.commands.insert(
                cmd.to_owned(),
                CommandResult {
                    status: 0,
                    stdout: stdout.to_owned(),
                    stderr: String::new(),
                },
            );
            self
        }

        fn with_failing_command(mut self, cmd: &str, status: i32) -> Self {
            self.commands.insert(
                cmd.to_owned(),
                CommandResult {
                    status,
                    stdout: String::new(),
                    stderr: "boom".to_owned(),
                },
            );
            self
        }
    }

    impl World for ScriptedWorld {
        fn exists(&self, _path: &Path) -> bool {
            false
        }
        fn read_to_string(&self, _path: &Path) -> std::io::Result<String> {
            Err(std::io::Error::from(std::io::ErrorKind::NotFound))
        }
        fn write_file(&self, path: &Path, contents: &str) -> std::io::Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((path.to_owned(), contents.to_owned()));
            Ok(())
        }
        fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }
        fn run_command(&self, _cwd: &Path, command: &str) -> std::io::Result<CommandResult> {
            Ok(self
                .commands
                .get(command)
                .cloned()
                .unwrap_or(CommandResult {
                    status: 127,
                    stdout: String::new(),
                    stderr: format!("unknown command: {command}"),
                }))
        }
    }

    fn cx<'a>(world: &'a dyn World, phase: Phase) -> ExpandContext<'a> {
        ExpandContext {
            world,
            file: Path::new("/src/test.gyp"),
            base_dir: Path::new("/src"),
            phase,
        }
    }

    fn eval(src: &str, scope_src: &str, world: &dyn World, phase: Phase) -> Dict {
        let mut dict = parse_dict(src).unwrap();
        let scope = parse_dict(scope_src).unwrap();
        evaluate(&mut dict, &scope, &cx(world, phase)).unwrap();
        dict
    }

    #[test]
    fn simple_substitution() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'name': 'prog-<(ARCH)', 'flags': ['-m<(BITS)']}",
            "{'ARCH': 'x64', 'BITS': 64}",
            &world,
            Phase::Early,
        );
        assert_eq!(dict["name"], Value::from("prog-x64"));
        assert_eq!(dict["flags"], Value::List(vec!["-m64".into()]));
    }

    #[test]
    fn chained_variables_resolve_in_one_pass() {
        let world = ScriptedWorld::default();
        let mut dict = parse_dict("{'variables': {'FOO': '<(BAR)', 'BAR': 'baz'}, 'v': '<(FOO)'}")
            .unwrap();
        let scope = Dict::new();
        evaluate(&mut dict, &scope, &cx(&world, Phase::Early)).unwrap();
        assert_eq!(dict["v"], Value::from("baz"));
        // A second pass is a no-op.
        let before = dict.clone();
        evaluate(&mut dict, &scope, &cx(&world, Phase::Early)).unwrap();
        assert_eq!(dict, before);
    }

    #[test]
    fn circular_variables_are_fatal() {
        let world = ScriptedWorld::default();
        let mut dict =
            parse_dict("{'variables': {'A': '<(B)', 'B': '<(A)'}, 'v': '<(A)'}").unwrap();
        let err = evaluate(&mut dict, &Dict::new(), &cx(&world, Phase::Early)).unwrap_err();
        assert!(matches!(err, ExpandError::CircularReference { .. }));
    }

    #[test]
    fn whole_string_keeps_type() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'list': '<@(items)', 'n': '<(count)'}",
            "{'items': ['a', 'b'], 'count': 3}",
            &world,
            Phase::Early,
        );
        assert_eq!(dict["list"], Value::List(vec!["a".into(), "b".into()]));
        assert_eq!(dict["n"], Value::Int(3));
    }

    #[test]
    fn list_substitution_splices_into_parent_list() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'sources': ['pre.c', '<@(gen)', 'post.c']}",
            "{'gen': ['a.c', 'b.c']}",
            &world,
            Phase::Early,
        );
        assert_eq!(
            dict["sources"],
            Value::List(vec!["pre.c".into(), "a.c".into(), "b.c".into(), "post.c".into()])
        );
    }

    #[test]
    fn embedded_list_joins_with_spaces() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'cmd': 'tool <(args) done'}",
            "{'args': ['-a', '-b']}",
            &world,
            Phase::Early,
        );
        assert_eq!(dict["cmd"], Value::from("tool -a -b done"));
    }

    #[test]
    fn command_substitution() {
        let world = ScriptedWorld::default().with_command("echo hi", "hi\n");
        let dict = eval("{'v': '<!(echo hi)'}", "{}", &world, Phase::Early);
        assert_eq!(dict["v"], Value::from("hi"));

        let world = ScriptedWorld::default().with_command("ls", "a b\nc\n");
        let dict = eval("{'v': '<!@(ls)'}", "{}", &world, Phase::Early);
        assert_eq!(
            dict["v"],
            Value::List(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn failing_command_is_fatal() {
        let world = ScriptedWorld::default().with_failing_command("false", 1);
        let mut dict = parse_dict("{'v': '<!(false)'}").unwrap();
        let err = evaluate(&mut dict, &Dict::new(), &cx(&world, Phase::Early)).unwrap_err();
        match err {
            ExpandError::CommandFailed { status, .. } => assert_eq!(status, 1),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_parens_are_fatal() {
        let world = ScriptedWorld::default();
        let mut dict = parse_dict("{'v': '<(OPEN'}").unwrap();
        let err = evaluate(&mut dict, &Dict::new(), &cx(&world, Phase::Early)).unwrap_err();
        assert!(matches!(err, ExpandError::UnbalancedParens { .. }));
    }

    #[test]
    fn late_markers_survive_early_phase() {
        let world = ScriptedWorld::default();
        let dict = eval("{'v': '>(prod)'}", "{}", &world, Phase::Early);
        assert_eq!(dict["v"], Value::from(">(prod)"));
        let dict = eval("{'v': '>(prod)'}", "{'prod': 'out'}", &world, Phase::Late);
        assert_eq!(dict["v"], Value::from("out"));
    }

    #[test]
    fn conditions_merge_matching_branch() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'defines': ['ALWAYS'],
              'conditions': [
                ['OS==\"linux\"', {'defines': ['LINUX']}, {'defines': ['OTHER']}],
                ['OS==\"mac\"', {'defines': ['MAC']}],
              ]}",
            "{'OS': 'linux'}",
            &world,
            Phase::Early,
        );
        assert_eq!(
            dict["defines"],
            Value::List(vec!["ALWAYS".into(), "LINUX".into()])
        );
        assert!(!dict.contains_key("conditions"));
    }

    #[test]
    fn condition_branches_expand_after_merge() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'conditions': [['1', {'v': '<(X)'}]]}",
            "{'X': 'expanded'}",
            &world,
            Phase::Early,
        );
        assert_eq!(dict["v"], Value::from("expanded"));
    }

    #[test]
    fn target_conditions_only_evaluate_late() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'target_conditions': [['1', {'v': 'late'}]]}",
            "{}",
            &world,
            Phase::Early,
        );
        assert!(dict.contains_key("target_conditions"));
        let mut dict = dict;
        evaluate(&mut dict, &Dict::new(), &cx(&world, Phase::Late)).unwrap();
        assert_eq!(dict["v"], Value::from("late"));
        assert!(!dict.contains_key("target_conditions"));
    }

    #[test]
    fn file_list_form_writes_through_world() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'v': '<|(objs.txt <(items))'}",
            "{'items': ['a.o', 'b.o']}",
            &world,
            Phase::Early,
        );
        assert_eq!(dict["v"], Value::from("objs.txt"));
        let writes = world.writes.lock().unwrap();
        assert_eq!(
            writes.as_slice(),
            &[(PathBuf::from("/src/objs.txt"), "a.o b.o\n".to_owned())]
        );
    }

    #[test]
    fn expands_keys() {
        let world = ScriptedWorld::default();
        let dict = eval(
            "{'<(name)_suffix': 1}",
            "{'name': 'prog'}",
            &world,
            Phase::Early,
        );
        assert!(dict.contains_key("prog_suffix"));
    }
}
