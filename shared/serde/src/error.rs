use thiserror::Error;

/// Errors that can occur while reading wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// Reader ran out of bytes
    #[error("Unexpected end of buffer: needed {needed} bytes but only {remaining} remain. Data may be truncated or malformed")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A value was read that is not valid for the target type
    #[error("Invalid value {value} for {type_name}. Data may be corrupted or malicious")]
    InvalidValue {
        type_name: &'static str,
        value: u64,
    },

    /// String bytes were not valid UTF-8
    #[error("String payload is not valid UTF-8")]
    InvalidUtf8,
}
