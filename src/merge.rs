//! The deterministic merge discipline shared by includes, defaults,
//! configurations, and dependent-settings propagation.
//!
//! Merge rules: scalars overwrite, sequences concatenate in appearance
//! order, mappings merge recursively. A key may carry a suffix operator
//! that changes this: `=` replaces outright, `+` prepends, `?` sets only
//! if the key is absent. List keys ending in `!` or `/` are exclusion
//! and pattern-filter siblings, applied by [`process_list_filters`].

use indexmap::IndexMap;

use crate::value::{Dict, Value};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("cannot merge {found} into {existing} at {path}")]
    TypeMismatch {
        path: String,
        existing: &'static str,
        found: &'static str,
    },

    #[error("configuration {0:?} inherits from itself")]
    InheritanceCycle(String),

    #[error("configuration {child:?} inherits from unknown configuration {parent:?}")]
    UnknownConfiguration { child: String, parent: String },

    #[error("bad filter {pattern:?} at {path}: {source}")]
    BadFilterPattern {
        path: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("malformed filter entry at {path}: expected ['exclude'|'include', pattern]")]
    MalformedFilter { path: String },
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

/// Merge `fro` into `to`, honoring the suffix operators on `fro`'s keys.
pub fn merge_dict(to: &mut Dict, fro: &Dict, path: &str) -> Result<(), MergeError> {
    for (key, value) in fro {
        if let Some(base) = key.strip_suffix('=') {
            to.insert(base.to_owned(), value.clone());
            continue;
        }
        if let Some(base) = key.strip_suffix('?') {
            if !to.contains_key(base) {
                to.insert(base.to_owned(), value.clone());
            }
            continue;
        }
        if let Some(base) = key.strip_suffix('+') {
            prepend(to, base, value, path)?;
            continue;
        }
        match to.get_mut(key) {
            None => {
                to.insert(key.clone(), value.clone());
            }
            Some(Value::Dict(existing)) => match value {
                Value::Dict(incoming) => merge_dict(existing, incoming, &child_path(path, key))?,
                other => {
                    return Err(MergeError::TypeMismatch {
                        path: child_path(path, key),
                        existing: "dict",
                        found: other.kind(),
                    });
                }
            },
            Some(Value::List(existing)) => match value {
                Value::List(incoming) => existing.extend(incoming.iter().cloned()),
                other => {
                    return Err(MergeError::TypeMismatch {
                        path: child_path(path, key),
                        existing: "list",
                        found: other.kind(),
                    });
                }
            },
            Some(existing) => match value {
                Value::Dict(_) | Value::List(_) => {
                    return Err(MergeError::TypeMismatch {
                        path: child_path(path, key),
                        existing: existing.kind(),
                        found: value.kind(),
                    });
                }
                scalar => *existing = scalar.clone(),
            },
        }
    }
    Ok(())
}

fn prepend(to: &mut Dict, base: &str, value: &Value, path: &str) -> Result<(), MergeError> {
    match (to.get_mut(base), value) {
        (None, _) => {
            to.insert(base.to_owned(), value.clone());
        }
        (Some(Value::List(existing)), Value::List(incoming)) => {
            let mut merged = incoming.clone();
            merged.append(existing);
            *existing = merged;
        }
        (Some(Value::Str(existing)), Value::Str(incoming)) => {
            *existing = format!("{incoming}{existing}");
        }
        (Some(existing), _) => {
            return Err(MergeError::TypeMismatch {
                path: child_path(path, base),
                existing: existing.kind(),
                found: value.kind(),
            });
        }
    }
    Ok(())
}

/// Apply a `target_defaults` dict under a target: the target's own keys
/// win on scalars, and its sequences append after the defaults'.
pub fn apply_target_defaults(
    target: &mut Dict,
    defaults: &Dict,
    path: &str,
) -> Result<(), MergeError> {
    let mut merged = defaults.clone();
    merge_dict(&mut merged, target, path)?;
    *target = merged;
    Ok(())
}

/// Settings keys that live per-configuration. Target-level occurrences
/// are hoisted into every configuration during
/// [`setup_configurations`]; `libraries` intentionally stays at target
/// level, where the link steps read it.
pub const CONFIG_SETTINGS_KEYS: &[&str] = &[
    "defines",
    "include_dirs",
    "cflags",
    "cflags_c",
    "cflags_cc",
    "ldflags",
    "xcode_settings",
    "msvs_settings",
];

/// Materialize the per-configuration dictionaries of a merged target:
/// hoist target-level settings into each configuration, resolve
/// `inherit_from` chains, and guarantee at least one configuration.
pub fn setup_configurations(target: &mut Dict, path: &str) -> Result<(), MergeError> {
    let mut configs = match target.shift_remove("configurations") {
        Some(Value::Dict(d)) if !d.is_empty() => d,
        _ => {
            let mut d = Dict::new();
            d.insert("Default".to_owned(), Value::Dict(Dict::new()));
            d
        }
    };

    // Target-level settings shared by every configuration.
    let mut hoisted = Dict::new();
    for &key in CONFIG_SETTINGS_KEYS {
        if let Some(value) = target.shift_remove(key) {
            hoisted.insert(key.to_owned(), value);
        }
    }

    let names: Vec<String> = configs.keys().cloned().collect();
    let mut resolved = Dict::new();
    for name in &names {
        let mut stack = Vec::new();
        let mut config = resolve_inheritance(name, &configs, &mut stack, path)?;
        let mut merged = hoisted.clone();
        merge_dict(&mut merged, &config, &child_path(path, name))?;
        config = merged;
        config.shift_remove("inherit_from");
        resolved.insert(name.clone(), Value::Dict(config));
    }
    configs = resolved;

    if !target.contains_key("default_configuration") {
        // Deterministic under ordered dicts: first declared wins.
        let first = names.first().cloned().unwrap_or_else(|| "Default".into());
        target.insert("default_configuration".to_owned(), Value::Str(first));
    }

    target.insert("configurations".to_owned(), Value::Dict(configs));
    Ok(())
}

fn resolve_inheritance(
    name: &str,
    configs: &Dict,
    stack: &mut Vec<String>,
    path: &str,
) -> Result<Dict, MergeError> {
    if stack.iter().any(|n| n == name) {
        return Err(MergeError::InheritanceCycle(name.to_owned()));
    }
    stack.push(name.to_owned());

    let config = configs
        .get(name)
        .and_then(Value::as_dict)
        .ok_or_else(|| MergeError::UnknownConfiguration {
            child: stack
                .first()
                .cloned()
                .unwrap_or_else(|| name.to_owned()),
            parent: name.to_owned(),
        })?;

    let mut base = Dict::new();
    if let Some(parents) = config.get("inherit_from") {
        let parents: Vec<String> = parents
            .string_list()
            .unwrap_or_else(|| parents.to_plain_string().into_iter().collect());
        for parent in &parents {
            let parent_config = resolve_inheritance(parent, configs, stack, path)?;
            merge_dict(&mut base, &parent_config, &child_path(path, name))?;
        }
    }
    merge_dict(&mut base, config, &child_path(path, name))?;

    stack.pop();
    Ok(base)
}

/// Apply `key!` exclusion lists and `key/` pattern filters to their base
/// lists, recursively through the whole tree. Exclusions and filters are
/// applied in declared order; an `include` filter restores previously
/// excluded entries.
pub fn process_list_filters(dict: &mut Dict, path: &str) -> Result<(), MergeError> {
    let filter_keys: Vec<String> = dict
        .keys()
        .filter(|k| k.ends_with('!') || k.ends_with('/'))
        .cloned()
        .collect();

    for key in filter_keys {
        let base = key[..key.len() - 1].to_owned();
        let Some(filter) = dict.shift_remove(&key) else {
            continue;
        };
        let Some(list) = dict.get_mut(&base).and_then(Value::as_list_mut) else {
            continue;
        };

        // Entries keep their original index so re-included items return
        // to their declared position.
        let mut kept: Vec<(usize, Value)> = std::mem::take(list).into_iter().enumerate().collect();
        let mut excluded: Vec<(usize, Value)> = Vec::new();

        if key.ends_with('!') {
            let patterns = filter.as_list().unwrap_or(&[]);
            let (ex, ke): (Vec<_>, Vec<_>) = kept
                .into_iter()
                .partition(|(_, v)| patterns.contains(v));
            kept = ke;
            excluded.extend(ex);
        } else {
            for entry in filter.as_list().unwrap_or(&[]) {
                let parts = entry.as_list().ok_or_else(|| MergeError::MalformedFilter {
                    path: child_path(path, &key),
                })?;
                let (action, pattern) = match parts {
                    [Value::Str(action), Value::Str(pattern)] => (action.as_str(), pattern),
                    _ => {
                        return Err(MergeError::MalformedFilter {
                            path: child_path(path, &key),
                        });
                    }
                };
                let re = regex::Regex::new(pattern).map_err(|source| {
                    MergeError::BadFilterPattern {
                        path: child_path(path, &key),
                        pattern: pattern.clone(),
                        source,
                    }
                })?;
                let matches =
                    |v: &Value| v.as_str().is_some_and(|s| re.is_match(s));
                match action {
                    "exclude" => {
                        let (ex, ke): (Vec<_>, Vec<_>) = kept.into_iter().partition(|(_, v)| matches(v));
                        kept = ke;
                        excluded.extend(ex);
                    }
                    "include" => {
                        let (inc, ex): (Vec<_>, Vec<_>) =
                            excluded.into_iter().partition(|(_, v)| matches(v));
                        excluded = ex;
                        kept.extend(inc);
                        kept.sort_by_key(|(i, _)| *i);
                    }
                    _ => {
                        return Err(MergeError::MalformedFilter {
                            path: child_path(path, &key),
                        });
                    }
                }
            }
        }

        let list = dict
            .get_mut(&base)
            .and_then(Value::as_list_mut)
            .expect("base list checked above");
        *list = kept.into_iter().map(|(_, v)| v).collect();
    }

    // Recurse into nested structures.
    let keys: Vec<String> = dict.keys().cloned().collect();
    for key in keys {
        match dict.get_mut(&key) {
            Some(Value::Dict(sub)) => process_list_filters(sub, &child_path(path, &key))?,
            Some(Value::List(items)) => {
                for (i, item) in items.iter_mut().enumerate() {
                    if let Value::Dict(sub) = item {
                        process_list_filters(sub, &format!("{}[{i}]", child_path(path, &key)))?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Split a propagated settings dict into its target-level part and the
/// per-configuration part, merging each where it belongs.
pub fn merge_settings(target: &mut Dict, settings: &Dict, path: &str) -> Result<(), MergeError> {
    let mut config_part = Dict::new();
    let mut target_part = Dict::new();
    for (key, value) in settings {
        let base = key.trim_end_matches(['=', '?', '+', '!', '/']);
        if CONFIG_SETTINGS_KEYS.contains(&base) {
            config_part.insert(key.clone(), value.clone());
        } else {
            target_part.insert(key.clone(), value.clone());
        }
    }
    merge_dict(target, &target_part, path)?;
    if !config_part.is_empty() {
        if let Some(configs) = target
            .get_mut("configurations")
            .and_then(Value::as_dict_mut)
        {
            let names: Vec<String> = configs.keys().cloned().collect();
            for name in names {
                if let Some(config) = configs.get_mut(&name).and_then(Value::as_dict_mut) {
                    merge_dict(config, &config_part, &child_path(path, &name))?;
                }
            }
        }
    }
    Ok(())
}
