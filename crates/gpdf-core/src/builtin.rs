//! Handles for functions the server already provides

use std::rc::Rc;

use crate::func::{FunctionHandle, ServerFunction};

/// An existing server function, e.g. `function("abs", None)`.
pub fn function(name: &str, schema: Option<&str>) -> FunctionHandle {
    FunctionHandle::new(Rc::new(ServerFunction::new(name, schema, false)))
}

/// An existing server aggregate, e.g. `aggregate_function("array_agg", None)`.
pub fn aggregate_function(name: &str, schema: Option<&str>) -> FunctionHandle {
    FunctionHandle::new(Rc::new(ServerFunction::new(name, schema, true)))
}

pub fn count() -> FunctionHandle {
    aggregate_function("count", None)
}

pub fn min() -> FunctionHandle {
    aggregate_function("min", None)
}

pub fn max() -> FunctionHandle {
    aggregate_function("max", None)
}

pub fn avg() -> FunctionHandle {
    aggregate_function("avg", None)
}

pub fn sum() -> FunctionHandle {
    aggregate_function("sum", None)
}

pub fn generate_series() -> FunctionHandle {
    function("generate_series", None)
}
