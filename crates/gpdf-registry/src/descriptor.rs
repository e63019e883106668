//! Function descriptors and source-text signature parsing

use std::sync::LazyLock;

use gpdf_core::TypeAnnotation;
use regex::Regex;

use crate::registrar::Registrar;
use crate::RegistryError;

/// Everything needed to install a function, captured once at registration.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub params: Vec<(String, TypeAnnotation)>,
    pub returns: TypeAnnotation,
    /// Emit `RETURNS SETOF <type>`.
    pub returns_set: bool,
    /// Body in the server-side scripting language, without its indentation.
    pub body: String,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: TypeAnnotation::Void,
            returns_set: false,
            body: dedent(&body.into()),
        }
    }

    pub fn param(mut self, name: impl Into<String>, annotation: TypeAnnotation) -> Self {
        self.params.push((name.into(), annotation));
        self
    }

    pub fn returns(mut self, annotation: TypeAnnotation) -> Self {
        self.returns = annotation;
        self
    }

    pub fn returns_set(mut self, returns_set: bool) -> Self {
        self.returns_set = returns_set;
        self
    }

    /// Parse a `def name(param: type, ...) -> type:` definition.
    ///
    /// Decorator lines are skipped. Annotations that name composite types are
    /// resolved against the types defined on `registrar`.
    pub fn from_source(source: &str, registrar: &Registrar) -> Result<Self, RegistryError> {
        let source = dedent(source);
        let start = source
            .lines()
            .position(|line| !line.trim().is_empty() && !line.starts_with('@'))
            .ok_or_else(|| RegistryError::InvalidSource("source is empty".to_string()))?;
        let text: String = source.lines().skip(start).collect::<Vec<_>>().join("\n");

        let header = HEADER_RE
            .captures(&text)
            .ok_or_else(|| RegistryError::InvalidSource("expected a `def` statement".to_string()))?;
        let name = header[1].to_string();
        let open = header.get(0).map(|m| m.end()).unwrap_or_default();

        let close = matching_paren(&text, open).ok_or_else(|| {
            RegistryError::InvalidSource(format!("unbalanced parameter list of {}", name))
        })?;
        let params_text = &text[open..close];

        let rest = &text[close + 1..];
        let header_end = rest.find('\n').unwrap_or(rest.len());
        let tail = rest[..header_end].trim();
        let returns_text = tail
            .strip_suffix(':')
            .ok_or_else(|| RegistryError::InvalidSource(format!("missing ':' after signature of {}", name)))?
            .trim();
        let returns_text = match returns_text.strip_prefix("->") {
            Some(annotation) => annotation.trim(),
            None if returns_text.is_empty() => "None",
            None => {
                return Err(RegistryError::InvalidSource(format!(
                    "unexpected text after signature of {}: {}",
                    name, returns_text
                )))
            }
        };

        let mut params = Vec::new();
        for param in split_top_level(params_text, ',') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if param.starts_with('*') || param == "/" {
                return Err(RegistryError::InvalidSource(format!(
                    "variadic or positional-only parameter `{}` is not supported",
                    param
                )));
            }
            let declaration = split_top_level(param, '=').into_iter().next().unwrap_or(param);
            let (param_name, annotation) = declaration.split_once(':').ok_or_else(|| {
                RegistryError::InvalidSource(format!("parameter `{}` has no type annotation", param))
            })?;
            params.push((
                param_name.trim().to_string(),
                registrar.resolve_type(annotation.trim())?,
            ));
        }

        let body_lines: Vec<&str> = rest[header_end..]
            .lines()
            .filter(|line| line.starts_with(char::is_whitespace))
            .collect();
        if body_lines.is_empty() {
            return Err(RegistryError::InvalidSource(format!("function {} has no body", name)));
        }

        Ok(Self {
            name,
            params,
            returns: registrar.resolve_type(returns_text)?,
            returns_set: false,
            body: dedent(&body_lines.join("\n")),
        })
    }
}

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid function header pattern")
});

/// Index of the `)` closing the parenthesis opened just before `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return if c == ')' { Some(open + i) } else { None };
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside of brackets.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Remove the whitespace prefix shared by every non-blank line.
pub fn dedent(text: &str) -> String {
    let prefix = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines()
        .map(|line| line.get(prefix..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpdf_core::Settings;
    use pretty_assertions::assert_eq;

    fn registrar() -> Registrar {
        Registrar::new(Settings::default())
    }

    #[test]
    fn test_parse_simple_function() {
        let source = r#"
            @gp.create_function
            def label(prefix: str, id: int) -> str:
                prefix = "id"
                return f"{prefix}_{id}"
        "#;
        let descriptor = FunctionDescriptor::from_source(source, &registrar()).unwrap();
        assert_eq!(descriptor.name, "label");
        let params: Vec<(String, String)> = descriptor
            .params
            .iter()
            .map(|(n, t)| (n.clone(), t.to_sql_type()))
            .collect();
        assert_eq!(
            params,
            vec![
                ("prefix".to_string(), "text".to_string()),
                ("id".to_string(), "integer".to_string())
            ]
        );
        assert_eq!(descriptor.returns.to_sql_type(), "text");
        assert_eq!(descriptor.body, "prefix = \"id\"\nreturn f\"{prefix}_{id}\"");
    }

    #[test]
    fn test_parse_multiline_signature_and_defaults() {
        let source = "def total(\n    values: list[float],\n    scale: float = 1.0,\n) -> float:\n    return sum(values) * scale\n";
        let descriptor = FunctionDescriptor::from_source(source, &registrar()).unwrap();
        assert_eq!(descriptor.params.len(), 2);
        assert_eq!(descriptor.params[0].1.to_sql_type(), "double precision[]");
        assert_eq!(descriptor.body, "return sum(values) * scale");
    }

    #[test]
    fn test_missing_return_annotation_is_void() {
        let descriptor =
            FunctionDescriptor::from_source("def noop(x: int):\n    pass", &registrar()).unwrap();
        assert_eq!(descriptor.returns.to_sql_type(), "void");
    }

    #[test]
    fn test_rejects_bad_sources() {
        let r = registrar();
        assert!(matches!(
            FunctionDescriptor::from_source("x = 1", &r),
            Err(RegistryError::InvalidSource(_))
        ));
        assert!(matches!(
            FunctionDescriptor::from_source("def f(x):\n    return x", &r),
            Err(RegistryError::InvalidSource(_))
        ));
        assert!(matches!(
            FunctionDescriptor::from_source("def f(*args: int) -> int:\n    return 1", &r),
            Err(RegistryError::InvalidSource(_))
        ));
        assert!(matches!(
            FunctionDescriptor::from_source("def f(x: dict) -> int:\n    return 1", &r),
            Err(RegistryError::Core(gpdf_core::Error::UnsupportedType(_)))
        ));
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("    a\n      b\n\n    c"), "a\n  b\n\nc");
        assert_eq!(dedent("a\n b"), "a\n b");
    }

    #[test]
    fn test_builder() {
        let descriptor = FunctionDescriptor::new("add", "    return a + b")
            .param("a", TypeAnnotation::Int)
            .param("b", TypeAnnotation::Int)
            .returns(TypeAnnotation::Int)
            .returns_set(true);
        assert_eq!(descriptor.body, "return a + b");
        assert!(descriptor.returns_set);
    }
}
