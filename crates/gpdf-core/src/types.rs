//! Type mapper: host type annotations to SQL type names
//!
//! Primitive annotations map to built-in server types. Composite (record)
//! annotations are backed by a generated `CREATE TYPE`, issued at most once
//! per session before any function that uses the type is installed.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::session::Session;
use crate::sql::{generated_name, quote_ident};
use crate::value::Value;

/// A parameter or return type as declared on a registered function.
#[derive(Debug, Clone)]
pub enum TypeAnnotation {
    Void,
    Int,
    Float,
    Bool,
    Text,
    Bytes,
    Array(Box<TypeAnnotation>),
    Composite(Rc<CompositeType>),
    /// An existing server type referenced by name.
    Named(DataType),
}

impl TypeAnnotation {
    /// Parse an annotation such as `int`, `list[str]` or `Point`.
    ///
    /// Names that are neither primitive nor list forms are resolved through
    /// `lookup`, which returns composite types known to the caller.
    pub fn parse(
        text: &str,
        lookup: &dyn Fn(&str) -> Option<Rc<CompositeType>>,
    ) -> Result<TypeAnnotation> {
        let text = text.trim();
        let primitive = match text {
            "None" | "" => Some(TypeAnnotation::Void),
            "int" => Some(TypeAnnotation::Int),
            "float" => Some(TypeAnnotation::Float),
            "bool" => Some(TypeAnnotation::Bool),
            "str" => Some(TypeAnnotation::Text),
            "bytes" => Some(TypeAnnotation::Bytes),
            _ => None,
        };
        if let Some(annotation) = primitive {
            return Ok(annotation);
        }

        for prefix in ["list[", "List["] {
            if let Some(inner) = text.strip_prefix(prefix).and_then(|s| s.strip_suffix(']')) {
                let elem = TypeAnnotation::parse(inner, lookup)?;
                if matches!(elem, TypeAnnotation::Void | TypeAnnotation::Array(_)) {
                    return Err(Error::UnsupportedType(text.to_string()));
                }
                return Ok(TypeAnnotation::Array(Box::new(elem)));
            }
        }

        lookup(text)
            .map(TypeAnnotation::Composite)
            .ok_or_else(|| Error::UnsupportedType(text.to_string()))
    }

    pub fn to_sql_type(&self) -> String {
        match self {
            TypeAnnotation::Void => "void".to_string(),
            TypeAnnotation::Int => "integer".to_string(),
            TypeAnnotation::Float => "double precision".to_string(),
            TypeAnnotation::Bool => "boolean".to_string(),
            TypeAnnotation::Text => "text".to_string(),
            TypeAnnotation::Bytes => "bytea".to_string(),
            TypeAnnotation::Array(elem) => format!("{}[]", elem.to_sql_type()),
            TypeAnnotation::Composite(composite) => composite.qualified_name(),
            TypeAnnotation::Named(data_type) => data_type.qualified_name(),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, TypeAnnotation::Composite(_))
    }

    /// Issue any `CREATE TYPE` this annotation depends on.
    pub fn ensure_created(&self, session: &Session) -> Result<()> {
        match self {
            TypeAnnotation::Array(elem) => elem.ensure_created(session),
            TypeAnnotation::Composite(composite) => composite.ensure_created(session),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_type())
    }
}

/// Map an annotation to its SQL type name.
pub fn to_sql_type(annotation: &TypeAnnotation) -> String {
    annotation.to_sql_type()
}

/// Render a constant as SQL literal text.
pub fn to_sql_literal(value: &Value) -> String {
    value.to_sql_literal()
}

/// A record type with named fields, created on demand in the temp schema.
pub struct CompositeType {
    annotation_name: String,
    name: String,
    schema: String,
    fields: Vec<(String, TypeAnnotation)>,
    created_in: RefCell<HashSet<Uuid>>,
}

impl CompositeType {
    /// Declare a composite type; the server-side name is generated.
    pub fn new(
        annotation_name: impl Into<String>,
        fields: Vec<(String, TypeAnnotation)>,
        schema: impl Into<String>,
    ) -> Rc<Self> {
        Rc::new(Self {
            annotation_name: annotation_name.into(),
            name: generated_name("type"),
            schema: schema.into(),
            fields,
            created_in: RefCell::new(HashSet::new()),
        })
    }

    /// Name the type is referred to by in function source annotations.
    pub fn annotation_name(&self) -> &str {
        &self.annotation_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[(String, TypeAnnotation)] {
        &self.fields
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    pub fn create_statement(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.to_sql_type()))
            .collect();
        format!(
            "CREATE TYPE {} AS ({})",
            self.qualified_name(),
            fields.join(", ")
        )
    }

    pub fn is_created_in(&self, session: &Session) -> bool {
        self.created_in.borrow().contains(&session.id())
    }

    pub fn ensure_created(&self, session: &Session) -> Result<()> {
        if self.is_created_in(session) {
            return Ok(());
        }
        for (_, field) in &self.fields {
            field.ensure_created(session)?;
        }
        debug!(type_name = %self.name, annotation = %self.annotation_name, "creating composite type");
        session.run(&self.create_statement())?;
        self.created_in.borrow_mut().insert(session.id());
        Ok(())
    }
}

impl fmt::Debug for CompositeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeType")
            .field("annotation_name", &self.annotation_name)
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("fields", &self.fields)
            .finish()
    }
}

/// A type that already exists on the server, e.g. `date` or `varchar(10)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    name: String,
    schema: Option<String>,
    modifier: Option<u32>,
}

impl DataType {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            modifier: None,
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_modifier(mut self, modifier: u32) -> Self {
        self.modifier = Some(modifier);
        self
    }

    pub fn qualified_name(&self) -> String {
        let mut name = quote_ident(&self.name);
        if let Some(schema) = &self.schema {
            name = format!("{}.{}", quote_ident(schema), name);
        }
        if let Some(modifier) = self.modifier {
            name.push_str(&format!("({})", modifier));
        }
        name
    }

    /// Cast an expression (or constant) to this type.
    pub fn cast(&self, expr: impl Into<Expr>) -> Expr {
        Expr::Cast {
            expr: Box::new(expr.into()),
            type_name: self.qualified_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::mock::MockDatabase;
    use pretty_assertions::assert_eq;

    fn no_composites(_: &str) -> Option<Rc<CompositeType>> {
        None
    }

    #[test]
    fn test_primitive_mapping() {
        let cases = [
            ("None", "void"),
            ("int", "integer"),
            ("float", "double precision"),
            ("bool", "boolean"),
            ("str", "text"),
            ("bytes", "bytea"),
            ("list[int]", "integer[]"),
            ("List[str]", "text[]"),
        ];
        for (annotation, expected) in cases {
            let parsed = TypeAnnotation::parse(annotation, &no_composites).unwrap();
            assert_eq!(to_sql_type(&parsed), expected, "annotation {annotation}");
        }
    }

    #[test]
    fn test_unsupported_annotation() {
        let err = TypeAnnotation::parse("dict[str, int]", &no_composites).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(ref t) if t == "dict[str, int]"));
        assert!(TypeAnnotation::parse("list[None]", &no_composites).is_err());
    }

    #[test]
    fn test_composite_created_once_per_session() {
        let point = CompositeType::new(
            "Point",
            vec![
                ("x".to_string(), TypeAnnotation::Int),
                ("y".to_string(), TypeAnnotation::Float),
            ],
            "pg_temp",
        );
        let lookup = |name: &str| (name == "Point").then(|| point.clone());
        let annotation = TypeAnnotation::parse("list[Point]", &lookup).unwrap();
        assert_eq!(annotation.to_sql_type(), format!("\"pg_temp\".\"{}\"[]", point.name()));

        let mock = MockDatabase::new();
        let session = Session::new(mock.clone(), Settings::default());
        annotation.ensure_created(&session).unwrap();
        annotation.ensure_created(&session).unwrap();

        assert_eq!(
            mock.statements(),
            vec![format!(
                "CREATE TYPE \"pg_temp\".\"{}\" AS (\"x\" integer, \"y\" double precision)",
                point.name()
            )]
        );
        assert!(point.is_created_in(&session));
    }

    #[test]
    fn test_data_type_qualified_name_and_cast() {
        let varchar = DataType::named("varchar").with_modifier(10);
        assert_eq!(varchar.qualified_name(), "\"varchar\"(10)");
        let date = DataType::named("date").in_schema("pg_catalog");
        assert_eq!(date.cast("01-01-1990").to_sql(), "('01-01-1990'::\"pg_catalog\".\"date\")");
    }

    #[test]
    fn test_literal_helper() {
        assert_eq!(to_sql_literal(&Value::Null), "NULL");
        assert_eq!(to_sql_literal(&Value::from("a'b")), "'a''b'");
    }
}
