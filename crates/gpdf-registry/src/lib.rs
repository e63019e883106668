//! Function registrar for gpdf
//!
//! Turns descriptors of scripting-language functions into server-side
//! `CREATE FUNCTION` / `CREATE AGGREGATE` definitions and hands out
//! [`FunctionHandle`](gpdf_core::FunctionHandle)s that build call expressions
//! against them.

pub mod definition;
pub mod descriptor;
pub mod registrar;

pub use definition::{RegisteredAggregate, RegisteredFunction};
pub use descriptor::FunctionDescriptor;
pub use registrar::{RegisterOptions, Registrar, MAX_NAME_LENGTH};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Function name {name} is {len} bytes long, at most 63 are allowed")]
    NameTooLong { name: String, len: usize },

    #[error("Function {0} is not temporary and needs an explicit name")]
    NonTempRequiresName(String),

    #[error("Invalid function name: {0}")]
    InvalidName(String),

    #[error("Function {0} is already registered")]
    DuplicateFunction(String),

    #[error("Invalid aggregate: {0}")]
    InvalidAggregate(String),

    #[error("Invalid function source: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Core(#[from] gpdf_core::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
