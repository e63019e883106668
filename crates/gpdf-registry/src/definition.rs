//! Server-side definitions produced by the registrar

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use gpdf_core::sql::{generated_name, quote_ident};
use gpdf_core::{CallStyle, FunctionDef, Session, TypeAnnotation};
use tracing::debug;
use uuid::Uuid;

use crate::descriptor::FunctionDescriptor;

fn qualify(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", schema, name),
        None => name.to_string(),
    }
}

fn parameter_list(params: &[(String, TypeAnnotation)]) -> String {
    params
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.to_sql_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_verb(replace: bool, object: &str) -> String {
    if replace {
        format!("CREATE OR REPLACE {}", object)
    } else {
        format!("CREATE {}", object)
    }
}

/// A function installed from a descriptor, called row by row or over arrays.
pub struct RegisteredFunction {
    name: String,
    schema: Option<String>,
    descriptor: FunctionDescriptor,
    language: String,
    replace: bool,
    style: CallStyle,
    dollar_tag: String,
    created_in: RefCell<HashSet<Uuid>>,
}

impl RegisteredFunction {
    pub(crate) fn new(
        name: String,
        schema: Option<String>,
        descriptor: FunctionDescriptor,
        language: String,
        replace: bool,
        style: CallStyle,
    ) -> Self {
        let dollar_tag = if descriptor.body.contains("$$") {
            format!("${}$", generated_name("gpdf"))
        } else {
            "$$".to_string()
        };
        Self {
            name,
            schema,
            descriptor,
            language,
            replace,
            style,
            dollar_tag,
            created_in: RefCell::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn create_statement(&self) -> String {
        let returns = if self.descriptor.returns_set {
            format!("SETOF {}", self.descriptor.returns.to_sql_type())
        } else {
            self.descriptor.returns.to_sql_type()
        };
        format!(
            "{} {} ({}) RETURNS {} AS {}\n{}\n{} LANGUAGE {}",
            create_verb(self.replace, "FUNCTION"),
            self.qualified_name(),
            parameter_list(&self.descriptor.params),
            returns,
            self.dollar_tag,
            self.descriptor.body,
            self.dollar_tag,
            self.language
        )
    }

    pub fn is_created_in(&self, session: &Session) -> bool {
        self.created_in.borrow().contains(&session.id())
    }
}

impl FunctionDef for RegisteredFunction {
    fn qualified_name(&self) -> String {
        qualify(self.schema.as_deref(), &self.name)
    }

    fn call_style(&self) -> CallStyle {
        self.style
    }

    fn arity(&self) -> Option<usize> {
        Some(self.descriptor.params.len())
    }

    fn create_in(&self, session: &Session) -> gpdf_core::Result<()> {
        if self.is_created_in(session) {
            return Ok(());
        }
        for (_, ty) in &self.descriptor.params {
            ty.ensure_created(session)?;
        }
        self.descriptor.returns.ensure_created(session)?;
        debug!(function = %self.qualified_name(), "creating function");
        session.run(&self.create_statement())?;
        self.created_in.borrow_mut().insert(session.id());
        Ok(())
    }
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("name", &self.qualified_name())
            .field("style", &self.style)
            .field("params", &self.descriptor.params.len())
            .finish()
    }
}

/// An aggregate whose transition function takes the running state first.
pub struct RegisteredAggregate {
    name: String,
    schema: Option<String>,
    transition: Rc<RegisteredFunction>,
    replace: bool,
    created_in: RefCell<HashSet<Uuid>>,
}

impl RegisteredAggregate {
    pub(crate) fn new(
        name: String,
        schema: Option<String>,
        transition: Rc<RegisteredFunction>,
        replace: bool,
    ) -> Self {
        Self {
            name,
            schema,
            transition,
            replace,
            created_in: RefCell::new(HashSet::new()),
        }
    }

    pub fn transition(&self) -> &RegisteredFunction {
        &self.transition
    }

    pub fn state_type(&self) -> &TypeAnnotation {
        &self.transition.descriptor.params[0].1
    }

    /// Arguments a call passes, i.e. the transition parameters minus the state.
    pub fn args(&self) -> &[(String, TypeAnnotation)] {
        &self.transition.descriptor.params[1..]
    }

    pub fn create_statement(&self) -> String {
        format!(
            "{} {} ({}) (SFUNC = {}, STYPE = {})",
            create_verb(self.replace, "AGGREGATE"),
            self.qualified_name(),
            parameter_list(self.args()),
            self.transition.qualified_name(),
            self.state_type().to_sql_type()
        )
    }

    pub fn is_created_in(&self, session: &Session) -> bool {
        self.created_in.borrow().contains(&session.id())
    }
}

impl FunctionDef for RegisteredAggregate {
    fn qualified_name(&self) -> String {
        qualify(self.schema.as_deref(), &self.name)
    }

    fn call_style(&self) -> CallStyle {
        CallStyle::Aggregate
    }

    fn arity(&self) -> Option<usize> {
        Some(self.args().len())
    }

    fn create_in(&self, session: &Session) -> gpdf_core::Result<()> {
        if self.is_created_in(session) {
            return Ok(());
        }
        self.transition.create_in(session)?;
        debug!(aggregate = %self.qualified_name(), "creating aggregate");
        session.run(&self.create_statement())?;
        self.created_in.borrow_mut().insert(session.id());
        Ok(())
    }
}

impl fmt::Debug for RegisteredAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAggregate")
            .field("name", &self.qualified_name())
            .field("transition", &self.transition.qualified_name())
            .finish()
    }
}
