use thiserror::Error;

pub mod capture;
pub mod transport;

pub type Result<T> = core::result::Result<T, Error>;

/// Platform-specific error.
#[derive(Error, PartialEq, Clone, Debug)]
pub enum Error {
    #[error("no new frame is ready")]
    FrameNotReady,
    #[error("the frame size does not match its buffer")]
    FrameInvalidSize,
    #[error("frame producer has stopped")]
    FrameSourceClosed,

    #[error("transport was closed by the other end")]
    TransportClosed,
    #[error("transport timed out waiting for a reply")]
    TransportTimeout,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::TransportTimeout
            }
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Error::TransportClosed,
            _ => Error::Io(value.to_string()),
        }
    }
}
