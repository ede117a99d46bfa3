//! Typed view of a merged target, frozen before emission.
//!
//! Up to and including settings propagation the pipeline works on raw
//! dicts; emitters want structure. Freezing validates the shape once so
//! the emitters can stay simple.

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::paths::{self, DEFAULT_TOOLSET, QualifiedTarget};
use crate::value::{Dict, Value};

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("target {target} has no type")]
    MissingType { target: QualifiedTarget },

    #[error("unknown target type {type_name:?} for target {target}")]
    UnknownTargetType {
        target: QualifiedTarget,
        type_name: String,
    },

    #[error("action {action:?} of target {target} has no outputs")]
    ActionWithoutOutputs {
        target: QualifiedTarget,
        action: String,
    },

    #[error("action {action:?} of target {target} has no command")]
    ActionWithoutCommand {
        target: QualifiedTarget,
        action: String,
    },

    #[error(
        "rule {rule:?} of target {target} has outputs without %(INPUT_ROOT)s \
         but more than one source; outputs would collide"
    )]
    RuleOutputCollision {
        target: QualifiedTarget,
        rule: String,
    },

    #[error("rule {rule:?} of target {target} is missing {field}")]
    MalformedRule {
        target: QualifiedTarget,
        rule: String,
        field: &'static str,
    },

    #[error("{field} of target {target} is malformed")]
    MalformedField {
        target: QualifiedTarget,
        field: &'static str,
    },
}

/// What a target builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Executable,
    StaticLibrary,
    SharedLibrary,
    LoadableModule,
    None,
    Settings,
}

impl TargetType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "executable" => TargetType::Executable,
            "static_library" => TargetType::StaticLibrary,
            "shared_library" => TargetType::SharedLibrary,
            "loadable_module" => TargetType::LoadableModule,
            "none" => TargetType::None,
            "settings" => TargetType::Settings,
            _ => return None,
        })
    }

    /// Whether the final step of this target runs the linker.
    pub fn uses_linker(self) -> bool {
        matches!(
            self,
            TargetType::Executable | TargetType::SharedLibrary | TargetType::LoadableModule
        )
    }

    /// Whether this target's output belongs on a dependent's link line.
    pub fn is_linkable(self) -> bool {
        matches!(self, TargetType::StaticLibrary | TargetType::SharedLibrary)
    }

    /// `settings` targets only carry flags; they have no build edges
    /// and no output path.
    pub fn produces_output(self) -> bool {
        !matches!(self, TargetType::Settings)
    }
}

/// A single anonymous build step.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Tokenized command line.
    pub command: Vec<String>,
    pub message: Option<String>,
    pub process_outputs_as_sources: bool,
}

/// A pattern step applied to every matching source file.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    /// Extension without the leading dot.
    pub extension: String,
    pub inputs: Vec<String>,
    /// Output templates; `%(INPUT_ROOT)s` expands per source.
    pub outputs: Vec<String>,
    pub command: Vec<String>,
    pub message: Option<String>,
    pub process_outputs_as_sources: bool,
    /// The sources this rule fires for, taken out of `sources`.
    pub rule_sources: Vec<String>,
}

impl Rule {
    /// Expand the input-root marker in an output template. The marker's
    /// spelling depends on which backend's `RULE_INPUT_ROOT` the build
    /// description picked up.
    pub fn expand_input_root(template: &str, input_root: &str) -> String {
        template
            .replace("%(INPUT_ROOT)s", input_root)
            .replace("${SOURCE.filebase}", input_root)
            .replace("$root", input_root)
    }

    fn template_varies_per_source(template: &str) -> bool {
        template.contains("%(INPUT_ROOT)s")
            || template.contains("${SOURCE.filebase}")
            || template.contains("$root")
    }
}

#[derive(Debug, Clone)]
pub struct CopySet {
    pub destination: String,
    pub files: Vec<String>,
}

/// A frozen target. Identity is `qualified`; everything else is what
/// the emitters need, already validated.
#[derive(Debug, Clone)]
pub struct Target {
    pub qualified: QualifiedTarget,
    pub name: SmolStr,
    pub target_type: TargetType,
    pub toolset: SmolStr,
    pub sources: Vec<String>,
    pub dependencies: Vec<QualifiedTarget>,
    /// The user's declared list, before canonicalization and rewriting.
    pub dependencies_original: Vec<String>,
    pub configurations: IndexMap<String, Dict>,
    pub default_configuration: String,
    pub actions: Vec<Action>,
    pub rules: Vec<Rule>,
    pub copies: Vec<CopySet>,
    pub libraries: Vec<String>,
    pub product_name: Option<String>,
    pub product_prefix: Option<String>,
    pub product_extension: Option<String>,
    pub product_dir: Option<String>,
}

fn string_list(dict: &Dict, key: &str) -> Vec<String> {
    dict.get(key)
        .and_then(Value::string_list)
        .unwrap_or_default()
}

fn string_field(dict: &Dict, key: &str) -> Option<String> {
    dict.get(key).and_then(Value::to_plain_string)
}

impl Target {
    /// Freeze a merged target dict. `dependencies` must already be
    /// fully qualified.
    pub fn from_dict(qualified: QualifiedTarget, dict: &Dict) -> Result<Self, SpecError> {
        let type_name = dict
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SpecError::MissingType {
                target: qualified.clone(),
            })?;
        let target_type =
            TargetType::parse(type_name).ok_or_else(|| SpecError::UnknownTargetType {
                target: qualified.clone(),
                type_name: type_name.to_owned(),
            })?;

        let mut dependencies = Vec::new();
        for dep in string_list(dict, "dependencies") {
            let parsed =
                paths::parse_dependency(&dep, &qualified.build_file, DEFAULT_TOOLSET).map_err(
                    |_| SpecError::MalformedField {
                        target: qualified.clone(),
                        field: "dependencies",
                    },
                )?;
            dependencies.push(parsed);
        }

        let mut configurations = IndexMap::new();
        if let Some(configs) = dict.get("configurations").and_then(Value::as_dict) {
            for (name, config) in configs {
                let config = config.as_dict().ok_or_else(|| SpecError::MalformedField {
                    target: qualified.clone(),
                    field: "configurations",
                })?;
                configurations.insert(name.clone(), config.clone());
            }
        }
        let default_configuration = string_field(dict, "default_configuration")
            .or_else(|| configurations.keys().next().cloned())
            .unwrap_or_else(|| "Default".to_owned());

        let mut sources = string_list(dict, "sources");
        let actions = parse_actions(&qualified, dict)?;
        let rules = parse_rules(&qualified, dict, &mut sources)?;
        let copies = parse_copies(dict);

        Ok(Target {
            name: qualified.name.clone(),
            toolset: qualified.toolset.clone(),
            qualified,
            target_type,
            sources,
            dependencies,
            dependencies_original: string_list(dict, "dependencies_original"),
            configurations,
            default_configuration,
            actions,
            rules,
            copies,
            libraries: string_list(dict, "libraries"),
            product_name: string_field(dict, "product_name"),
            product_prefix: string_field(dict, "product_prefix"),
            product_extension: string_field(dict, "product_extension"),
            product_dir: string_field(dict, "product_dir"),
        })
    }

    pub fn config(&self, name: &str) -> Option<&Dict> {
        self.configurations.get(name)
    }

    /// The file name (no directory) of this target's primary output,
    /// or None for `settings` targets. Backends decide placement.
    pub fn output_file_name(&self) -> Option<String> {
        let (default_prefix, default_ext) = match self.target_type {
            TargetType::Executable => ("", ""),
            TargetType::StaticLibrary => ("lib", ".a"),
            TargetType::SharedLibrary | TargetType::LoadableModule => ("lib", ".so"),
            TargetType::None => return Some(format!("{}.stamp", self.name)),
            TargetType::Settings => return None,
        };

        let prefix = self.product_prefix.as_deref().unwrap_or(default_prefix);
        let extension = match &self.product_extension {
            Some(ext) => format!(".{ext}"),
            None => default_ext.to_owned(),
        };
        let base = match &self.product_name {
            Some(name) => name.clone(),
            None => {
                let mut name = self.name.as_str();
                // libfoo with a lib prefix would yield liblibfoo.
                if prefix == "lib" {
                    name = name.strip_prefix("lib").unwrap_or(name);
                }
                name.to_owned()
            }
        };
        Some(format!("{prefix}{base}{extension}"))
    }
}

fn parse_actions(qualified: &QualifiedTarget, dict: &Dict) -> Result<Vec<Action>, SpecError> {
    let mut out = Vec::new();
    let Some(actions) = dict.get("actions").and_then(Value::as_list) else {
        return Ok(out);
    };
    for action in actions {
        let action = action.as_dict().ok_or_else(|| SpecError::MalformedField {
            target: qualified.clone(),
            field: "actions",
        })?;
        let name = string_field(action, "action_name").unwrap_or_else(|| "action".to_owned());
        let outputs = string_list(action, "outputs");
        if outputs.is_empty() {
            return Err(SpecError::ActionWithoutOutputs {
                target: qualified.clone(),
                action: name,
            });
        }
        let command = string_list(action, "action");
        if command.is_empty() {
            return Err(SpecError::ActionWithoutCommand {
                target: qualified.clone(),
                action: name,
            });
        }
        out.push(Action {
            inputs: string_list(action, "inputs"),
            outputs,
            command,
            message: string_field(action, "message"),
            process_outputs_as_sources: action
                .get("process_outputs_as_sources")
                .is_some_and(Value::truthy),
            name,
        });
    }
    Ok(out)
}

fn parse_rules(
    qualified: &QualifiedTarget,
    dict: &Dict,
    sources: &mut Vec<String>,
) -> Result<Vec<Rule>, SpecError> {
    let mut out = Vec::new();
    let Some(rules) = dict.get("rules").and_then(Value::as_list) else {
        return Ok(out);
    };
    for rule in rules {
        let rule = rule.as_dict().ok_or_else(|| SpecError::MalformedField {
            target: qualified.clone(),
            field: "rules",
        })?;
        let name = string_field(rule, "rule_name").unwrap_or_else(|| "rule".to_owned());
        let extension = string_field(rule, "extension")
            .map(|e| e.trim_start_matches('.').to_owned())
            .ok_or_else(|| SpecError::MalformedRule {
                target: qualified.clone(),
                rule: name.clone(),
                field: "extension",
            })?;
        let outputs = string_list(rule, "outputs");
        if outputs.is_empty() {
            return Err(SpecError::MalformedRule {
                target: qualified.clone(),
                rule: name.clone(),
                field: "outputs",
            });
        }
        let command = string_list(rule, "action");
        if command.is_empty() {
            return Err(SpecError::MalformedRule {
                target: qualified.clone(),
                rule: name.clone(),
                field: "action",
            });
        }

        // Sources matching the extension move from the compile set to
        // the rule.
        let suffix = format!(".{extension}");
        let mut rule_sources = string_list(rule, "rule_sources");
        if rule_sources.is_empty() {
            let (matched, kept): (Vec<String>, Vec<String>) =
                std::mem::take(sources).into_iter().partition(|s| s.ends_with(&suffix));
            rule_sources = matched;
            *sources = kept;
        }

        if rule_sources.len() > 1
            && outputs.iter().any(|o| !Rule::template_varies_per_source(o))
        {
            return Err(SpecError::RuleOutputCollision {
                target: qualified.clone(),
                rule: name,
            });
        }

        out.push(Rule {
            inputs: string_list(rule, "inputs"),
            outputs,
            command,
            message: string_field(rule, "message"),
            process_outputs_as_sources: rule
                .get("process_outputs_as_sources")
                .is_some_and(Value::truthy),
            rule_sources,
            name,
            extension,
        });
    }
    Ok(out)
}

fn parse_copies(dict: &Dict) -> Vec<CopySet> {
    let mut out = Vec::new();
    let Some(copies) = dict.get("copies").and_then(Value::as_list) else {
        return out;
    };
    for copy in copies {
        let Some(copy) = copy.as_dict() else { continue };
        let Some(destination) = string_field(copy, "destination") else {
            continue;
        };
        out.push(CopySet {
            destination,
            files: string_list(copy, "files"),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_dict;
    use std::path::Path;

    fn freeze(src: &str) -> Result<Target, SpecError> {
        let dict = parse_dict(src).unwrap();
        Target::from_dict(
            QualifiedTarget::new(Path::new("/src/x.gyp"), "prog", "target"),
            &dict,
        )
    }

    #[test]
    fn product_naming_defaults() {
        let t = freeze("{'type': 'executable'}").unwrap();
        assert_eq!(t.output_file_name().as_deref(), Some("prog"));

        let t = freeze("{'type': 'static_library'}").unwrap();
        assert_eq!(t.output_file_name().as_deref(), Some("libprog.a"));

        let t = freeze("{'type': 'shared_library'}").unwrap();
        assert_eq!(t.output_file_name().as_deref(), Some("libprog.so"));

        let t = freeze("{'type': 'none'}").unwrap();
        assert_eq!(t.output_file_name().as_deref(), Some("prog.stamp"));

        let t = freeze("{'type': 'settings'}").unwrap();
        assert_eq!(t.output_file_name(), None);
    }

    #[test]
    fn product_overrides() {
        let t = freeze(
            "{'type': 'shared_library', 'product_name': 'core', 'product_extension': 'plugin'}",
        )
        .unwrap();
        assert_eq!(t.output_file_name().as_deref(), Some("libcore.plugin"));
    }

    #[test]
    fn lib_prefix_is_snipped() {
        let dict = parse_dict("{'type': 'static_library'}").unwrap();
        let t = Target::from_dict(
            QualifiedTarget::new(Path::new("/s/x.gyp"), "libfoo", "target"),
            &dict,
        )
        .unwrap();
        assert_eq!(t.output_file_name().as_deref(), Some("libfoo.a"));
    }

    #[test]
    fn unknown_type_is_fatal() {
        assert!(matches!(
            freeze("{'type': 'jar'}"),
            Err(SpecError::UnknownTargetType { .. })
        ));
    }

    #[test]
    fn action_without_outputs_is_fatal() {
        let err = freeze(
            "{'type': 'none',
              'actions': [{'action_name': 'gen', 'inputs': [], 'outputs': [],
                           'action': ['python', 'gen.py']}]}",
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::ActionWithoutOutputs { .. }));
    }

    #[test]
    fn rules_claim_matching_sources() {
        let t = freeze(
            "{'type': 'executable',
              'sources': ['main.c', 'data.proto', 'more.proto'],
              'rules': [{'rule_name': 'protoc', 'extension': 'proto',
                         'outputs': ['gen/%(INPUT_ROOT)s.pb.c'],
                         'action': ['protoc', '<(RULE_INPUT_PATH)']}]}",
        )
        .unwrap();
        assert_eq!(t.sources, vec!["main.c".to_owned()]);
        assert_eq!(
            t.rules[0].rule_sources,
            vec!["data.proto".to_owned(), "more.proto".to_owned()]
        );
    }

    #[test]
    fn rule_output_collision_is_fatal() {
        let err = freeze(
            "{'type': 'none',
              'sources': ['a.proto', 'b.proto'],
              'rules': [{'rule_name': 'bad', 'extension': 'proto',
                         'outputs': ['always_same.c'],
                         'action': ['gen']}]}",
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::RuleOutputCollision { .. }));
    }

    #[test]
    fn input_root_expansion() {
        assert_eq!(
            Rule::expand_input_root("gen/%(INPUT_ROOT)s.cc", "foo"),
            "gen/foo.cc"
        );
    }
}
