//! Parameter-list splitting for dump call lines.
//!
//! The dump tool prints parameters as `name = value` pairs joined by `", "`,
//! and values may themselves contain `", "` (arrays, structs, bitfields). The
//! list is split on `" = "` first; each middle fragment is then cut at its
//! last `", "` into the tail of the previous value and the next name. A value
//! that contains a literal `" = "` cannot be told apart from a delimiter.
//!
//! Everything that depends on this heuristic goes through [`split_params`].

use serde::{Deserialize, Serialize};

/// One named parameter of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Separator between a parameter name and its value.
const NAME_VALUE_SEP: &str = " = ";

/// Separator between consecutive parameters.
const PARAM_SEP: &str = ", ";

/// Split a parameter list into `(name, value)` pairs, left to right.
///
/// Pairs whose name could not be recovered come back with an empty name;
/// callers drop them once the list is final.
pub fn split_params(text: &str) -> Vec<Param> {
    let fragments: Vec<&str> = text.split(NAME_VALUE_SEP).collect();
    let Some((last, init)) = fragments.split_last() else {
        return Vec::new();
    };
    let Some((first, middle)) = init.split_first() else {
        // No `name = value` pair at all: an empty list or a bare value.
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![Param::new("", text)]
        };
    };

    let mut params = Vec::with_capacity(init.len());
    let mut name = first.trim().to_string();

    for fragment in middle {
        let (value, next_name) = match fragment.rsplit_once(PARAM_SEP) {
            Some((value, next_name)) => (value, next_name.trim()),
            None => (*fragment, ""),
        };
        params.push(Param::new(std::mem::take(&mut name), value));
        name = next_name.to_string();
    }

    params.push(Param::new(name, *last));
    params
}

/// Render parameters back into the dump's `name = value, ...` form.
pub fn join_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| format!("{}{NAME_VALUE_SEP}{}", p.name, p.value))
        .collect::<Vec<_>>()
        .join(PARAM_SEP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_pairs() {
        let params = split_params("shader = 1, count = 1");
        assert_eq!(
            params,
            vec![Param::new("shader", "1"), Param::new("count", "1")]
        );
    }

    #[test]
    fn values_with_embedded_commas() {
        let text = "attribs = {kCGLPFAAccelerated, kCGLPFAColorSize, 24, 0}, pix = &0x4700020, npix = &2";
        let params = split_params(text);
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].name, "attribs");
        assert_eq!(params[0].value, "{kCGLPFAAccelerated, kCGLPFAColorSize, 24, 0}");
        assert_eq!(params[1], Param::new("pix", "&0x4700020"));
        assert_eq!(params[2], Param::new("npix", "&2"));
    }

    #[test]
    fn last_value_keeps_its_commas() {
        let params = split_params("v = {1, 2, 3}");
        assert_eq!(params, vec![Param::new("v", "{1, 2, 3}")]);
    }

    #[test]
    fn empty_and_bare_lists() {
        assert!(split_params("").is_empty());
        assert!(split_params("   ").is_empty());
        let bare = split_params("dpy");
        assert_eq!(bare, vec![Param::new("", "dpy")]);
    }

    #[test]
    fn fragment_without_separator_loses_its_name() {
        let params = split_params("a = 1 b = 2");
        assert_eq!(params, vec![Param::new("a", "1 b"), Param::new("", "2")]);
    }

    #[test]
    fn join_reverses_split() {
        let text = "target = GL_ARRAY_BUFFER, size = 36, data = {0.5, -0.5, 0}, usage = GL_STATIC_DRAW";
        assert_eq!(join_params(&split_params(text)), text);
    }
}
