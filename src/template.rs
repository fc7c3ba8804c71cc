/*!
This module implements the placeholder syntax used throughout a benchalot
configuration. Any string value that ends up in a command, working directory,
environment value or output file name may refer to a matrix variable with
'{{var}}', or to a field of a compound matrix variable with '{{var.field}}'.

Expansion happens while the plan is built, before any command executes, so a
typo'd variable name fails the whole run up front instead of halfway through
a benchmark.
*/

use crate::format::config::{Bindings, Value};

/// A single variable reference found in a template string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub field: Option<String>,
}

impl VarRef {
    /// The result table column this reference selects: 'var' for a scalar
    /// reference and 'var.field' for a field access.
    pub fn column(&self) -> String {
        match self.field {
            None => self.name.clone(),
            Some(ref field) => format!("{}.{}", self.name, field),
        }
    }
}

/// Returns true if the given string is a valid template identifier, i.e., a
/// valid matrix variable or field name.
pub fn is_identifier(s: &str) -> bool {
    regex!(r"^[A-Za-z_][A-Za-z0-9_]*$").is_match(s)
}

/// Replace every '{{var}}' and '{{var.field}}' placeholder in the input with
/// the string form of the bound value.
///
/// Braces are matched literally. There is no escaping syntax and no nesting;
/// text that merely resembles a placeholder (say, '{{not valid!}}') is left
/// untouched.
pub fn expand(input: &str, bindings: &Bindings) -> anyhow::Result<String> {
    let re = regex!(
        r"\{\{([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?\}\}",
    );
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let m = caps.get(0).unwrap();
        out.push_str(&input[last..m.start()]);
        last = m.end();

        let name = caps.get(1).unwrap().as_str();
        let field = caps.get(2).map(|f| f.as_str());
        let value = match bindings.get(name) {
            Some(value) => value,
            None => anyhow::bail!("unknown variable '{}'", name),
        };
        match (value, field) {
            (Value::Scalar(scalar), None) => {
                out.push_str(&scalar.to_string());
            }
            (Value::Scalar(_), Some(field)) => anyhow::bail!(
                "variable '{}' is not a compound variable, \
                 but field '{}' was requested",
                name,
                field,
            ),
            (Value::Record(_), None) => anyhow::bail!(
                "variable '{}' is a compound variable and \
                 requires a field access, as in '{}.somefield'",
                name,
                name,
            ),
            (Value::Record(record), Some(field)) => {
                let scalar = match record.get(field) {
                    Some(scalar) => scalar,
                    None => anyhow::bail!(
                        "compound variable '{}' has no field '{}'",
                        name,
                        field,
                    ),
                };
                out.push_str(&scalar.to_string());
            }
        }
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Returns every variable reference in the input, in order of appearance and
/// with duplicates removed.
pub fn variable_refs(input: &str) -> Vec<VarRef> {
    let re = regex!(
        r"\{\{([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?\}\}",
    );
    let mut refs: Vec<VarRef> = vec![];
    for caps in re.captures_iter(input) {
        let vref = VarRef {
            name: caps.get(1).unwrap().as_str().to_string(),
            field: caps.get(2).map(|f| f.as_str().to_string()),
        };
        if !refs.contains(&vref) {
            refs.push(vref);
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use crate::format::config::Scalar;

    use super::*;

    fn bindings(pairs: &[(&str, Value)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn scalar(s: &str) -> Value {
        Value::Scalar(Scalar::Str(s.to_string()))
    }

    fn record(fields: &[(&str, Scalar)]) -> Value {
        Value::Record(
            fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        )
    }

    #[test]
    fn scalars() {
        let b = bindings(&[
            ("compiler", scalar("gcc")),
            ("opt", Value::Scalar(Scalar::Int(2))),
        ]);
        let got = expand("{{compiler}} -O{{opt}} main.c", &b).unwrap();
        assert_eq!("gcc -O2 main.c", got);
    }

    #[test]
    fn fields() {
        let b = bindings(&[(
            "input",
            record(&[
                ("path", Scalar::Str("data/big.txt".to_string())),
                ("lines", Scalar::Int(1000)),
            ]),
        )]);
        let got = expand("wc -l {{input.path}} # {{input.lines}}", &b).unwrap();
        assert_eq!("wc -l data/big.txt # 1000", got);
    }

    #[test]
    fn bool_and_float_forms() {
        let b = bindings(&[
            ("fast", Value::Scalar(Scalar::Bool(true))),
            ("ratio", Value::Scalar(Scalar::Float(1.5))),
        ]);
        assert_eq!("true 1.5", expand("{{fast}} {{ratio}}", &b).unwrap());
    }

    #[test]
    fn unknown_variable() {
        let b = bindings(&[("x", scalar("1"))]);
        let err = expand("echo {{y}}", &b).unwrap_err();
        assert!(err.to_string().contains("unknown variable 'y'"));
    }

    #[test]
    fn field_on_scalar() {
        let b = bindings(&[("x", scalar("1"))]);
        let err = expand("echo {{x.f}}", &b).unwrap_err();
        assert!(err.to_string().contains("not a compound variable"));
    }

    #[test]
    fn record_without_field() {
        let b = bindings(&[("x", record(&[("f", Scalar::Int(1))]))]);
        let err = expand("echo {{x}}", &b).unwrap_err();
        assert!(err.to_string().contains("requires a field access"));
    }

    #[test]
    fn missing_field() {
        let b = bindings(&[("x", record(&[("f", Scalar::Int(1))]))]);
        let err = expand("echo {{x.g}}", &b).unwrap_err();
        assert!(err.to_string().contains("no field 'g'"));
    }

    #[test]
    fn non_placeholders_left_alone() {
        let b = bindings(&[("x", scalar("1"))]);
        let got = expand("echo {{9bad}} {{x}} {{a-b}}", &b).unwrap();
        assert_eq!("echo {{9bad}} 1 {{a-b}}", got);
    }

    #[test]
    fn refs() {
        let refs = variable_refs("out-{{a}}-{{b.f}}-{{a}}.csv");
        assert_eq!(
            vec![
                VarRef { name: "a".to_string(), field: None },
                VarRef {
                    name: "b".to_string(),
                    field: Some("f".to_string())
                },
            ],
            refs,
        );
        assert_eq!("a", refs[0].column());
        assert_eq!("b.f", refs[1].column());
    }
}
