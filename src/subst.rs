// src/subst.rs
//
// Placeholder substitution for command templates.
//
// `<name>` is replaced by the value mapped to `name`. Placeholders with no
// mapping are left alone: templates are filled in several passes (output
// directory first, then per-test values, then the per-iteration seed).

/// Replace every `<key>` in `template` with its value, in the order given.
pub fn subst_vars<I, K, V>(template: &str, vars: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("<{}>", key.as_ref());
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value.as_ref());
        }
    }
    out
}

/// Collapse a multi-line YAML option block into one line of arguments.
pub fn flatten_newlines(s: &str) -> String {
    s.replace('\n', " ")
}
