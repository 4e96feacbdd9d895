/// Domain-specific error types for taxomap
///
/// Record-level problems never surface here: they become UNMAPPED results.
/// These errors cover construction (catalog, overrides, configuration) and
/// request validation at the transport boundary.

#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MapperError {
    fn from(e: std::io::Error) -> Self {
        MapperError::Io(e.to_string())
    }
}

impl From<crate::embedding::EmbeddingError> for MapperError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        MapperError::Internal(e.to_string())
    }
}

impl MapperError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use taxomap::errors::MapperError;
    /// let err = MapperError::validation("label", "Label cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        MapperError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}
