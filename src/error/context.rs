//! Error context and chaining utilities
//!
//! Provides tools for building error chains with context information,
//! so a failed tenant connection can be traced from the facade down to
//! the driver error that caused it.

use super::Error;
use std::fmt;

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to the error
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>;

    /// Add context with lazy evaluation
    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>,
    {
        self.map_err(|e| Into::<Error>::into(e).with_context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Into::<Error>::into(e).with_context(f()))
    }
}

/// Helper for walking an error chain
pub struct ErrorChain<'a> {
    error: &'a Error,
    chain: Vec<String>,
}

impl<'a> ErrorChain<'a> {
    /// Create a new error chain
    pub fn new(error: &'a Error) -> Self {
        let mut chain = Vec::new();
        Self::build_chain(error, &mut chain);
        Self { error, chain }
    }

    fn build_chain(error: &Error, chain: &mut Vec<String>) {
        chain.push(error.to_string());

        if let Error::WithContext { source, .. } = error {
            Self::build_chain(source, chain);
        }
    }

    /// Get the full error chain as a vector
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Get the root cause of the error
    pub fn root_cause(&self) -> &Error {
        let mut current = self.error;
        while let Error::WithContext { source, .. } = current {
            current = source;
        }
        current
    }

    /// Format the error chain on a single line, suitable for log records
    pub fn format_for_log(&self) -> String {
        self.chain.join(" -> ")
    }
}

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_for_log())
    }
}
