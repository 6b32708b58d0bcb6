use std::fmt::{Debug, Display};

/// Errors raised while building a `StripeConfig` from external
/// configuration. These are fatal and propagate unmodified to the caller;
/// an infeasible tiling candidate is never an error (it is skipped).
pub enum StripeConfigError {
    /// The override file could not be read.
    Io(std::io::Error),

    /// A line did not match any recognized form. Line numbers are 1-based.
    Syntax { line: usize, contents: String },

    /// A `Name=Value` assignment named an unknown option.
    UnknownName { line: usize, name: String },

    /// A `Name=Value` assignment had a value of the wrong form for the
    /// named option.
    BadValue {
        line: usize,
        name: String,
        value: String,
    },

    /// A section header was not a valid regular expression.
    BadSectionPattern { line: usize, pattern: String },
}

impl From<std::io::Error> for StripeConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl Display for StripeConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Debug for StripeConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StripeConfigError::Io(err) => {
                writeln!(f, "Unable to read stripe config override file: {err}")
            }
            StripeConfigError::Syntax { line, contents } => {
                writeln!(f, "Stripe config line {line}: unrecognized syntax: '{contents}'")
            }
            StripeConfigError::UnknownName { line, name } => {
                writeln!(f, "Stripe config line {line}: unknown option '{name}'")
            }
            StripeConfigError::BadValue { line, name, value } => {
                writeln!(
                    f,
                    "Stripe config line {line}: invalid value '{value}' for option '{name}'"
                )
            }
            StripeConfigError::BadSectionPattern { line, pattern } => {
                writeln!(
                    f,
                    "Stripe config line {line}: invalid section pattern '{pattern}'"
                )
            }
        }
    }
}

impl std::error::Error for StripeConfigError {}
