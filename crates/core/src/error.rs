#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("ComfyUI execution failed: {0}")]
    Execution(String),

    #[error("No output file found in history")]
    NoOutput,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
