//! Error types for ChatSync Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Invalid room id")]
    InvalidRoom,

    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("Room is not open: {0}")]
    RoomNotOpen(String),

    #[error("Message has no content")]
    EmptyMessage,

    #[error("Not connected")]
    NotConnected,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
