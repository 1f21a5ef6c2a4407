use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("not found: \"{0}\"")]
    NotFound(String),

    #[error("invalid {what} signature 0x{found:08X}")]
    InvalidSignature { what: &'static str, found: u32 },

    #[error("invalid entry type in \"{container}\": {entry_type:08X}")]
    InvalidEntryType { container: String, entry_type: u32 },

    #[error("{0}")]
    InvalidFormat(String),

    #[error("couldn't read {expected} bytes from \"{path}\" (got {actual})")]
    ShortRead {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    PngEncoding(#[from] png::EncodingError),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("couldn't serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("loading task exited without a result")]
    LoaderDisconnected,
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
