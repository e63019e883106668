//! Registration scope: resolves names, creates definitions, hands out handles

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

use gpdf_core::sql::generated_name;
use gpdf_core::{builtin, CallStyle, CompositeType, FunctionDef, FunctionHandle, Session, Settings, TypeAnnotation};
use regex::Regex;
use tracing::{debug, info};

use crate::definition::{RegisteredAggregate, RegisteredFunction};
use crate::descriptor::FunctionDescriptor;
use crate::{RegistryError, Result};

/// Longest identifier the server accepts without truncation.
pub const MAX_NAME_LENGTH: usize = 63;

/// Options for a single registration.
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Server-side name; defaults to the descriptor's name.
    pub name: Option<String>,
    /// Schema for non-temporary functions.
    pub schema: Option<String>,
    /// Install in the session-temporary schema.
    pub temp: bool,
    /// Language handler; defaults to the registrar settings.
    pub language: Option<String>,
    /// Issue `CREATE OR REPLACE` and overwrite an existing registration.
    pub replace: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            name: None,
            schema: None,
            temp: true,
            language: None,
            replace: false,
        }
    }
}

impl RegisterOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Install as a permanent object; requires an explicit name.
    pub fn persistent(mut self) -> Self {
        self.temp = false;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn replace(mut self) -> Self {
        self.replace = true;
        self
    }
}

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("valid identifier pattern"));

/// Turns descriptors into server-side functions and keeps track of them.
///
/// When constructed with a session, DDL is issued at registration time;
/// otherwise definitions are created the first time a query that calls them
/// is executed.
pub struct Registrar {
    settings: Settings,
    session: Option<Session>,
    types: RefCell<HashMap<String, Rc<CompositeType>>>,
    scope: RefCell<HashMap<String, FunctionHandle>>,
}

impl Registrar {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            session: None,
            types: RefCell::new(HashMap::new()),
            scope: RefCell::new(HashMap::new()),
        }
    }

    /// Registrar that realizes definitions in `session` eagerly.
    pub fn with_session(session: &Session) -> Self {
        Self {
            session: Some(session.clone()),
            ..Self::new(session.settings().clone())
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Declare a composite type usable in annotations under `name`.
    pub fn define_type(&self, name: &str, fields: &[(&str, &str)]) -> Result<Rc<CompositeType>> {
        let mut resolved = Vec::with_capacity(fields.len());
        for (field, annotation) in fields {
            resolved.push((field.to_string(), self.resolve_type(annotation)?));
        }
        let composite = CompositeType::new(name, resolved, self.settings.temp_schema.clone());
        if let Some(session) = &self.session {
            composite.ensure_created(session)?;
        }
        debug!(annotation = %name, type_name = %composite.name(), "defined composite type");
        self.types
            .borrow_mut()
            .insert(name.to_string(), composite.clone());
        Ok(composite)
    }

    /// Resolve an annotation against the primitive types and defined composites.
    pub fn resolve_type(&self, annotation: &str) -> Result<TypeAnnotation> {
        let types = self.types.borrow();
        let lookup = |name: &str| types.get(name).cloned();
        Ok(TypeAnnotation::parse(annotation, &lookup)?)
    }

    pub fn parse_source(&self, source: &str) -> Result<FunctionDescriptor> {
        FunctionDescriptor::from_source(source, self)
    }

    pub fn register(&self, descriptor: FunctionDescriptor, options: RegisterOptions) -> Result<FunctionHandle> {
        self.register_with_style(descriptor, options, CallStyle::Scalar)
    }

    pub fn register_source(&self, source: &str, options: RegisterOptions) -> Result<FunctionHandle> {
        let descriptor = self.parse_source(source)?;
        self.register(descriptor, options)
    }

    /// Register a function whose arguments are whole columns collapsed into arrays.
    pub fn register_array_function(
        &self,
        descriptor: FunctionDescriptor,
        options: RegisterOptions,
    ) -> Result<FunctionHandle> {
        self.register_with_style(descriptor, options, CallStyle::Array)
    }

    /// Register an aggregate from its transition function.
    ///
    /// The first parameter of `transition` is the running state; its type
    /// becomes the aggregate's `STYPE` and must match the return type.
    pub fn register_aggregate(
        &self,
        transition: FunctionDescriptor,
        options: RegisterOptions,
    ) -> Result<FunctionHandle> {
        if transition.params.len() < 2 {
            return Err(RegistryError::InvalidAggregate(format!(
                "transition function {} needs a state parameter and at least one argument",
                transition.name
            )));
        }
        let state = transition.params[0].1.to_sql_type();
        let returns = transition.returns.to_sql_type();
        if transition.returns_set || state != returns {
            return Err(RegistryError::InvalidAggregate(format!(
                "transition function {} must return its state type {}, not {}",
                transition.name, state, returns
            )));
        }

        let (name, schema) = self.resolve_name(&transition.name, &options)?;
        let language = self.language(&options);
        let function = Rc::new(RegisteredFunction::new(
            generated_name("func"),
            Some(self.settings.temp_schema.clone()),
            transition,
            language,
            false,
            CallStyle::Scalar,
        ));
        let aggregate = RegisteredAggregate::new(name, schema, function, options.replace);
        self.install(Rc::new(aggregate), options.replace)
    }

    /// Handle for `name`: a registered function when one matches, else a
    /// server function that is assumed to exist.
    pub fn function(&self, name: &str, schema: Option<&str>) -> FunctionHandle {
        self.lookup(name, schema)
            .unwrap_or_else(|| self.attach(builtin::function(name, schema)))
    }

    pub fn aggregate_function(&self, name: &str, schema: Option<&str>) -> FunctionHandle {
        self.lookup(name, schema)
            .unwrap_or_else(|| self.attach(builtin::aggregate_function(name, schema)))
    }

    /// Qualified names of every registered function.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scope.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    fn register_with_style(
        &self,
        descriptor: FunctionDescriptor,
        options: RegisterOptions,
        style: CallStyle,
    ) -> Result<FunctionHandle> {
        let (name, schema) = self.resolve_name(&descriptor.name, &options)?;
        let language = self.language(&options);
        let function = RegisteredFunction::new(name, schema, descriptor, language, options.replace, style);
        self.install(Rc::new(function), options.replace)
    }

    fn resolve_name(&self, default: &str, options: &RegisterOptions) -> Result<(String, Option<String>)> {
        let name = match (&options.name, options.temp) {
            (Some(name), _) => name.clone(),
            (None, true) => default.to_string(),
            (None, false) => return Err(RegistryError::NonTempRequiresName(default.to_string())),
        };
        if !IDENTIFIER_RE.is_match(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        let schema = if options.temp {
            Some(self.settings.temp_schema.clone())
        } else {
            options.schema.clone()
        };
        let qualified = match &schema {
            Some(schema) => format!("{}.{}", schema, name),
            None => name.clone(),
        };
        if qualified.len() > MAX_NAME_LENGTH {
            return Err(RegistryError::NameTooLong {
                len: qualified.len(),
                name: qualified,
            });
        }
        Ok((name, schema))
    }

    fn language(&self, options: &RegisterOptions) -> String {
        options
            .language
            .clone()
            .unwrap_or_else(|| self.settings.language_handler.clone())
    }

    fn install(&self, def: Rc<dyn FunctionDef>, replace: bool) -> Result<FunctionHandle> {
        let qualified = def.qualified_name();
        if !replace && self.scope.borrow().contains_key(&qualified) {
            return Err(RegistryError::DuplicateFunction(qualified));
        }
        if let Some(session) = &self.session {
            def.create_in(session)?;
        }
        info!(function = %qualified, replace, "registered function");
        let handle = self.attach(FunctionHandle::new(def));
        self.scope.borrow_mut().insert(qualified, handle.clone());
        Ok(handle)
    }

    fn attach(&self, handle: FunctionHandle) -> FunctionHandle {
        match &self.session {
            Some(session) => handle.with_session(session.clone()),
            None => handle,
        }
    }

    fn lookup(&self, name: &str, schema: Option<&str>) -> Option<FunctionHandle> {
        let scope = self.scope.borrow();
        match schema {
            Some(schema) => scope.get(&format!("{}.{}", schema, name)).cloned(),
            None => scope
                .get(name)
                .or_else(|| scope.get(&format!("{}.{}", self.settings.temp_schema, name)))
                .cloned(),
        }
    }
}
