//! SQL text analysis
//!
//! A single quote/comment aware scanner shared by the validator and the
//! sandbox engine, plus the static safety validator built on it.

pub mod lexer;
pub mod validator;

pub use validator::{
    sanitize, validate_identifier, Severity, SqlValidator, ValidationCode, ValidationError,
    ValidationResult, ValidationWarning, ValidatorOptions, WarningCode,
};
