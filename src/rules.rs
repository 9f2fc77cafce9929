//! Build-rule rendering for excavated dependencies.

use serde::Serialize;

/// The collected result of excavating a recipe: one [`Rule`] per traced
/// command.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Excavation {
    pub commands: Vec<Rule>,
}

/// One command with the inputs and outputs its trace uncovered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    pub command: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,

    /// Paths the command deleted. Informational; they take part in no rule
    /// grammar.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removals: Vec<String>,
}

impl Excavation {
    pub fn push(&mut self, rule: Rule) {
        self.commands.push(rule);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// A Knit rule set: colon-delimited rules wrapped in `return r{ ... }`.
    pub fn to_knit(&self) -> String {
        let mut out = String::from("return r{\n");
        for rule in &self.commands {
            out.push_str(&rule.to_knit());
            out.push('\n');
        }
        out.push('}');
        out
    }

    /// Make rules, newline-separated, with tab-indented recipe lines.
    pub fn to_make(&self) -> String {
        let rules: Vec<_> = self.commands.iter().map(Rule::to_make).collect();
        rules.join("\n")
    }
}

impl Rule {
    fn to_knit(&self) -> String {
        format!(
            "$ {}: {}\n    {}",
            self.outputs.join(" "),
            self.inputs.join(" "),
            self.command
        )
    }

    fn to_make(&self) -> String {
        let mut targets = self.outputs.join(" ");
        if self.outputs.len() > 1 {
            // Grouped target: one recipe invocation produces all of them.
            targets.push_str(" &");
        }
        format!("{}: {}\n\t{}", targets, self.inputs.join(" "), self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(command: &str, inputs: &[&str], outputs: &[&str]) -> Rule {
        Rule {
            command: command.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            removals: Vec::new(),
        }
    }

    #[test]
    fn knit_wraps_rules_in_a_returned_ruleset() {
        let mut ex = Excavation::default();
        ex.push(rule("cat a.txt > b.txt", &["a.txt"], &["b.txt"]));

        assert_eq!(
            ex.to_knit(),
            "return r{\n$ b.txt: a.txt\n    cat a.txt > b.txt\n}"
        );
    }

    #[test]
    fn make_uses_tab_recipes() {
        let mut ex = Excavation::default();
        ex.push(rule("cc -c foo.c -o foo.o", &["foo.c"], &["foo.o"]));

        assert_eq!(ex.to_make(), "foo.o: foo.c\n\tcc -c foo.c -o foo.o");
    }

    #[test]
    fn make_marks_grouped_targets() {
        let mut ex = Excavation::default();
        ex.push(rule("bison -d parse.y", &["parse.y"], &["parse.c", "parse.h"]));

        assert_eq!(
            ex.to_make(),
            "parse.c parse.h &: parse.y\n\tbison -d parse.y"
        );
    }

    #[test]
    fn json_uses_the_original_field_names() {
        let mut ex = Excavation::default();
        ex.push(rule("cp a b", &["a"], &["b"]));

        let json = ex.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"Commands":[{"Command":"cp a b","Inputs":["a"],"Outputs":["b"]}]}"#
        );
    }

    #[test]
    fn json_includes_removals_when_present() {
        let mut ex = Excavation::default();
        let mut r = rule("mv src dst", &[], &["dst"]);
        r.removals = vec!["src".into()];
        ex.push(r);

        let json = ex.to_json().unwrap();
        assert!(json.contains(r#""Removals":["src"]"#));
    }
}
