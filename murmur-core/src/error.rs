use thiserror::Error;

/// All errors produced by murmur-core.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("audio stream already taken for this session")]
    StreamAlreadyTaken,

    #[error("input already flushed; no further text accepted")]
    InputClosed,

    #[error("session has finished; no further text accepted")]
    SessionFinished,

    #[error("committed cursor {offset} lies past the spoken text ({len} bytes)")]
    CursorMismatch { offset: usize, len: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("synthesis backend error: {0}")]
    Backend(String),

    #[error("synthesis server failed to start: {0}")]
    ServerStartup(String),

    #[error("WAV decode error: {0}")]
    Wav(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<hound::Error> for SpeechError {
    fn from(e: hound::Error) -> Self {
        SpeechError::Wav(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;
