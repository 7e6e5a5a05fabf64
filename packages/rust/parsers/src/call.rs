//! Single-line call parsing.
//!
//! A dump call line looks like
//! `209 CGLFlushDrawable(ctx = 0x805a200) = kCGLNoError`: a call id, the
//! function name, a parenthesised parameter list, and an optional return
//! value after the last `)`.
//!
//! Shader sources are printed verbatim, so a `glShaderSource` call spans
//! several lines. Its first line ends inside the source string
//! (`string = &"#version 330`); [`parse_call_line`] reports that as
//! [`CallLine::ShaderSource`] and the dump parser feeds the following lines
//! to [`PartialCall::finish`] once the terminator line arrives.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::params::{Param, join_params, split_params};

/// One recorded API invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// Call number as printed by the dump tool.
    pub id: String,
    pub function_name: String,
    /// Parameters in declaration order.
    pub params: Vec<Param>,
    /// Return value text without the leading `=`; empty for `void` calls.
    pub return_value: String,
}

impl Call {
    fn new(id: &str, function_name: &str, mut params: Vec<Param>, return_value: &str) -> Self {
        params.retain(|p| !p.name.is_empty());
        Self {
            id: id.to_string(),
            function_name: function_name.to_string(),
            params,
            return_value: return_value.to_string(),
        }
    }

    /// Look up a parameter value by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}({})",
            self.id,
            self.function_name,
            join_params(&self.params)
        )?;
        if !self.return_value.is_empty() {
            write!(f, " = {}", self.return_value)?;
        }
        Ok(())
    }
}

/// Why a line could not be turned into a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Malformed {
    #[error("no opening parenthesis")]
    MissingOpenParen,
    #[error("no closing parenthesis")]
    MissingCloseParen,
    #[error("missing call id or function name")]
    MissingHead,
}

/// Result of parsing one call line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallLine {
    /// The whole call was on this line.
    Complete(Call),
    /// The line opens a multi-line shader source.
    ShaderSource(PartialCall),
}

/// A call whose shader-source parameter continues on following lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCall {
    id: String,
    function_name: String,
    params: Vec<Param>,
    /// Index in `params` of the value holding the source text.
    marker: usize,
}

impl PartialCall {
    /// Position of the shader-source value among the parameters parsed so far.
    pub fn marker_index(&self) -> usize {
        self.marker
    }

    /// Complete the call from the accumulated source lines and the
    /// terminator line (`}", length = NULL)`).
    ///
    /// `source` holds the lines between the first and the terminator line,
    /// each followed by a `\n` escape.
    pub fn finish(self, source: &str, terminator: &str) -> Call {
        let (closing, trailing) = match TERMINATOR_RE.find(terminator) {
            // Keep the closing quote with the source text.
            Some(m) => (&terminator[..=m.start()], &terminator[m.start() + 1..]),
            None => (terminator, ""),
        };
        let trailing = trailing.trim_start().trim_start_matches(',');

        let mut params = self.params;
        if let Some(marked) = params.get_mut(self.marker) {
            marked.value = format!("{}\\n{source}{closing}", marked.value);
        }

        let (rest, return_value) = split_return(trailing);
        params.extend(split_params(rest));
        Call::new(&self.id, &self.function_name, params, return_value)
    }
}

/// Closing quote of a shader source followed by the `length` parameter and
/// the end of the parameter list.
static TERMINATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"",\s*length\s*=.*\)"#).expect("terminator regex"));

/// Whether `line` closes a multi-line shader source.
pub fn is_shader_terminator(line: &str) -> bool {
    TERMINATOR_RE.is_match(line)
}

/// Whether a parameter value opens a shader source (`&"#version 330 core`).
///
/// The quoted string must still be open at the end of the line; a closed
/// `"#version ..."` value is an ordinary string argument.
fn is_shader_marker(value: &str) -> bool {
    let quoted = value.trim_start_matches(['&', '{']);
    let Some(text) = quoted.strip_prefix('"') else {
        return false;
    };
    text.starts_with('#') && text.contains("version") && !text.trim_end().ends_with('"')
}

fn opens_shader(params: &[Param]) -> bool {
    params.last().is_some_and(|p| is_shader_marker(&p.value))
}

/// Split `params) = ret` at the last `)`.
fn split_return(text: &str) -> (&str, &str) {
    match text.rfind(')') {
        Some(close) => {
            let ret = text[close + 1..].trim();
            let ret = ret.strip_prefix('=').map_or(ret, str::trim_start);
            (&text[..close], ret)
        }
        None => (text, ""),
    }
}

/// Parse one non-blank dump line.
pub fn parse_call_line(line: &str) -> Result<CallLine, Malformed> {
    let (head, rest) = line.split_once('(').ok_or(Malformed::MissingOpenParen)?;

    let mut head = head.split_whitespace();
    let (Some(id), Some(function_name)) = (head.next(), head.next()) else {
        return Err(Malformed::MissingHead);
    };

    if let Some(close) = rest.rfind(')') {
        let params = split_params(&rest[..close]);
        if !opens_shader(&params) || is_shader_terminator(rest) {
            let (_, return_value) = split_return(rest);
            return Ok(CallLine::Complete(Call::new(
                id,
                function_name,
                params,
                return_value,
            )));
        }
    }

    // Either no `)` at all or the `)` belongs to the shader text.
    let params = split_params(rest);
    if !opens_shader(&params) {
        return Err(Malformed::MissingCloseParen);
    }
    Ok(CallLine::ShaderSource(PartialCall {
        id: id.to_string(),
        function_name: function_name.to_string(),
        marker: params.len() - 1,
        params,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(line: &str) -> Call {
        match parse_call_line(line) {
            Ok(CallLine::Complete(call)) => call,
            other => panic!("expected a complete call for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses_call_with_return_value() {
        let call = complete("209 CGLFlushDrawable(ctx = 0x805a200) = kCGLNoError");
        assert_eq!(call.id, "209");
        assert_eq!(call.function_name, "CGLFlushDrawable");
        assert_eq!(call.params, vec![Param::new("ctx", "0x805a200")]);
        assert_eq!(call.return_value, "kCGLNoError");
    }

    #[test]
    fn parses_void_call_without_params() {
        let call = complete("12 glFlush()");
        assert_eq!(call.function_name, "glFlush");
        assert!(call.params.is_empty());
        assert!(call.return_value.is_empty());
    }

    #[test]
    fn parses_nested_parentheses_in_values() {
        let call = complete("7 glFoo(a = f(1), b = 2) = 0");
        assert_eq!(call.param("a"), Some("f(1)"));
        assert_eq!(call.param("b"), Some("2"));
        assert_eq!(call.return_value, "0");
    }

    #[test]
    fn render_round_trip() {
        let lines = [
            "209 CGLFlushDrawable(ctx = 0x805a200) = kCGLNoError",
            "3 CGLChoosePixelFormat(attribs = {kCGLPFAAccelerated, kCGLPFAColorSize, 24, 0}, pix = &0x4700020, npix = &2) = kCGLNoError",
            "44 glDrawArrays(mode = GL_TRIANGLES, first = 0, count = 3)",
            "12 glFlush()",
        ];
        for line in lines {
            let call = complete(line);
            assert_eq!(call.to_string(), line);
            let reparsed = complete(&call.to_string());
            assert_eq!(reparsed, call);
        }
    }

    #[test]
    fn malformed_lines() {
        assert_eq!(
            parse_call_line("Rendering 3 frames"),
            Err(Malformed::MissingOpenParen)
        );
        assert_eq!(
            parse_call_line("17 glEnable(cap = GL_BLEND"),
            Err(Malformed::MissingCloseParen)
        );
        assert_eq!(parse_call_line("glEnable(cap = 1)"), Err(Malformed::MissingHead));
    }

    #[test]
    fn version_string_in_return_value_is_not_a_shader() {
        let call = complete(
            r##"18 glGetString(name = GL_SHADING_LANGUAGE_VERSION) = "#version 4.10""##,
        );
        assert_eq!(call.param("name"), Some("GL_SHADING_LANGUAGE_VERSION"));
        assert_eq!(call.return_value, r##""#version 4.10""##);
    }

    #[test]
    fn shader_source_start_is_partial() {
        let line = r##"193 glShaderSource(shader = 1, count = 1, string = &"#version 330"##;
        let Ok(CallLine::ShaderSource(partial)) = parse_call_line(line) else {
            panic!("expected a shader-source continuation");
        };
        assert_eq!(partial.marker_index(), 2);

        let call = partial.finish(r"void main() {\n", r#"}", length = NULL)"#);
        assert_eq!(call.id, "193");
        assert_eq!(call.function_name, "glShaderSource");
        assert_eq!(call.param("shader"), Some("1"));
        assert_eq!(call.param("count"), Some("1"));
        assert_eq!(
            call.param("string"),
            Some(r##"&"#version 330\nvoid main() {\n}""##)
        );
        assert_eq!(call.param("length"), Some("NULL"));
        assert_eq!(call.params.len(), 4);
    }

    #[test]
    fn shader_source_on_one_line_is_complete() {
        let call = complete(
            r##"193 glShaderSource(shader = 1, count = 1, string = &"#version 330 core", length = NULL)"##,
        );
        assert_eq!(call.params.len(), 4);
        assert_eq!(call.param("string"), Some(r##"&"#version 330 core""##));
        assert_eq!(call.param("length"), Some("NULL"));
    }

    #[test]
    fn closed_version_string_is_an_ordinary_argument() {
        let call = complete(
            r##"88 glObjectLabel(identifier = GL_PROGRAM, name = 3, length = -1, label = "#version check")"##,
        );
        assert_eq!(call.function_name, "glObjectLabel");
        assert_eq!(call.param("label"), Some(r##""#version check""##));
        assert_eq!(call.params.len(), 4);

        assert_eq!(
            parse_call_line(r##"88 glObjectLabel(label = "#version check""##),
            Err(Malformed::MissingCloseParen)
        );
    }

    #[test]
    fn terminator_detection() {
        assert!(is_shader_terminator(r#"}", length = NULL)"#));
        assert!(is_shader_terminator(r#"}",length = &12) = 0"#));
        assert!(!is_shader_terminator("}"));
        assert!(!is_shader_terminator(r#"}", length = NULL"#));
    }
}
