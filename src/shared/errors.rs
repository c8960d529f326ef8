#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create runtime path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read workflow state {path}: {source}")]
    ReadState {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow state {path}: {source}")]
    ParseState {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode workflow state {path}: {source}")]
    EncodeState {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write workflow state {path}: {source}")]
    WriteState {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove sandbox {path}: {source}")]
    RemoveSandbox {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("event loop channel disconnected")]
    EventChannelClosed,
}
