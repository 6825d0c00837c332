use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum StreamError {
    #[snafu(display("websocket error: {source}"))]
    WebSocket { source: tokio_tungstenite::tungstenite::Error },
    #[snafu(display("invalid relay url: {source}"))]
    Url { source: url::ParseError },
    #[snafu(display("envelope decode failed: {reason}"))]
    Envelope { reason: String },
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
