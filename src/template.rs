//! `{name}` placeholders in command templates.
//!
//! A placeholder is an identifier in braces. `{node}` is left alone so that the executor can fill
//! in each node's rank, and shell expansions like `${HOME}` are not placeholders at all. Any other
//! placeholder must have a value.

use std::collections::BTreeMap;

use crate::command::NODE_PLACEHOLDER;
use crate::config::ConfigError;

/// Values for template placeholders.
pub type Vars = BTreeMap<String, String>;

fn is_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Fill in every placeholder of `template` from `vars`.
pub fn render(template: &str, vars: &Vars) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (before, from_brace) = rest.split_at(open);
        out.push_str(before);

        let close = match from_brace.find('}') {
            Some(close) => close,
            None => {
                rest = from_brace;
                break;
            }
        };

        let whole = &from_brace[..=close];
        let name = &from_brace[1..close];
        let shell_expansion = before.ends_with('$');

        if shell_expansion || whole == NODE_PLACEHOLDER || !is_ident(name) {
            out.push_str(whole);
        } else {
            match vars.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(ConfigError::UnknownPlaceholder {
                        template: template.to_owned(),
                        name: name.to_owned(),
                    })
                }
            }
        }

        rest = &from_brace[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Build a `Vars` from `name => value` pairs.
#[macro_export]
macro_rules! vars {
    ($($name:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut vars = $crate::template::Vars::new();
        $(
            vars.insert($name.to_string(), $value.to_string());
        )*
        vars
    }};
}
