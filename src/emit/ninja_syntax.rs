//! A minimal writer for the ninja build file syntax: just the
//! statements the ninja emitter needs, with the canonical `$`-escaped
//! line wrapping.

const LINE_WIDTH: usize = 78;

/// Escape a path for use in a build statement. `$` always needs it;
/// `:` and space only matter in paths, which is where this is used.
pub fn escape_path(path: &str) -> String {
    path.replace('$', "$$").replace(' ', "$ ").replace(':', "$:")
}

#[derive(Default)]
pub struct Writer {
    out: String,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn newline(&mut self) {
        self.out.push('\n');
    }

    pub fn comment(&mut self, text: &str) {
        self.out.push_str("# ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn variable(&mut self, key: &str, value: &str, indent: usize) {
        if value.is_empty() {
            return;
        }
        self.line(&format!("{key} = {value}"), indent);
    }

    pub fn rule(&mut self, name: &str, command: &str, description: Option<&str>) {
        self.rule_extra(name, command, description, false);
    }

    /// `generator = 1` marks a rule as the one that re-invokes the
    /// generator; ninja treats its output specially.
    pub fn rule_extra(
        &mut self,
        name: &str,
        command: &str,
        description: Option<&str>,
        generator: bool,
    ) {
        self.line(&format!("rule {name}"), 0);
        self.variable("command", command, 1);
        if let Some(description) = description {
            self.variable("description", description, 1);
        }
        if generator {
            self.variable("generator", "1", 1);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        outputs: &[String],
        rule: &str,
        inputs: &[String],
        implicit: &[String],
        order_only: &[String],
        variables: &[(String, String)],
    ) {
        let mut line = String::from("build ");
        line.push_str(
            &outputs
                .iter()
                .map(|o| escape_path(o))
                .collect::<Vec<_>>()
                .join(" "),
        );
        line.push_str(": ");
        line.push_str(rule);
        for input in inputs {
            line.push(' ');
            line.push_str(&escape_path(input));
        }
        if !implicit.is_empty() {
            line.push_str(" |");
            for input in implicit {
                line.push(' ');
                line.push_str(&escape_path(input));
            }
        }
        if !order_only.is_empty() {
            line.push_str(" ||");
            for input in order_only {
                line.push(' ');
                line.push_str(&escape_path(input));
            }
        }
        self.line(&line, 0);
        for (key, value) in variables {
            self.variable(key, value, 1);
        }
    }

    pub fn subninja(&mut self, path: &str) {
        self.line(&format!("subninja {path}"), 0);
    }

    pub fn into_string(self) -> String {
        self.out
    }

    /// Write a statement, wrapping long lines with `$` continuations on
    /// space boundaries.
    fn line(&mut self, text: &str, indent: usize) {
        let mut leading = "  ".repeat(indent);
        let mut rest = text;
        while leading.len() + rest.len() > LINE_WIDTH {
            let available = LINE_WIDTH - leading.len() - " $".len();
            // Find the last space we can break on that is not escaped.
            let mut split = None;
            for (i, _) in rest.match_indices(' ') {
                if i <= available && !rest[..i].ends_with('$') {
                    split = Some(i);
                }
            }
            let Some(split) = split else { break };
            self.out.push_str(&leading);
            self.out.push_str(&rest[..split]);
            self.out.push_str(" $\n");
            rest = &rest[split + 1..];
            leading = "  ".repeat(indent + 2);
        }
        self.out.push_str(&leading);
        self.out.push_str(rest);
        self.out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_statement_shape() {
        let mut w = Writer::new();
        w.build(
            &["out.o".to_owned()],
            "cc",
            &["in.c".to_owned()],
            &[],
            &["predep.stamp".to_owned()],
            &[("cflags".to_owned(), "-O2".to_owned())],
        );
        assert_eq!(
            w.into_string(),
            "build out.o: cc in.c || predep.stamp\n  cflags = -O2\n"
        );
    }

    #[test]
    fn paths_are_escaped() {
        assert_eq!(escape_path("a$b"), "a$$b");
        assert_eq!(escape_path("a:b"), "a$:b");
    }

    #[test]
    fn long_lines_wrap_with_continuations() {
        let mut w = Writer::new();
        let inputs: Vec<String> = (0..20).map(|i| format!("dir/input_{i}.c")).collect();
        w.build(&["out.o".to_owned()], "cc", &inputs, &[], &[], &[]);
        let text = w.into_string();
        for line in text.lines() {
            assert!(line.len() <= LINE_WIDTH, "line too long: {line:?}");
        }
        assert!(text.contains(" $\n"));
    }
}
