use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaylineError {
    // Definition errors
    #[error("Workflow definition error: {workflow}: {message}")]
    Definition { workflow: String, message: String },

    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Engine errors
    #[error("Invalid run state: {0}")]
    InvalidState(String),

    #[error("Unresolvable route from node '{node}': no branch for {state_key} = {value}")]
    Routing {
        node: String,
        state_key: String,
        value: String,
    },

    #[error("State schema violation: {0}")]
    Schema(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaylineError {
    pub fn definition(workflow: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Definition {
            workflow: workflow.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WaylineError>;
