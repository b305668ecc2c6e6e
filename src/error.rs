use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed tick: {0}")]
    MalformedTick(String),

    #[error("tick source closed")]
    SourceClosed,
}
