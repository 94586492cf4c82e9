use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("DNS {transport} server failed: {message}")]
    Server {
        transport: &'static str,
        message: String,
    },

    #[error("tunnel send failed: {0}")]
    TunnelSend(#[source] std::io::Error),

    #[error("tunnel receive failed: {0}")]
    TunnelRecv(#[source] std::io::Error),

    #[error("tunnel frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(u32),

    #[error("malformed tunnel frame: {0}")]
    MalformedFrame(String),

    #[error("configuration error: {0}")]
    Config(String),
}
