use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Leech(#[from] vcz_leech::error::Error),
    #[error("Could not read the session file `{0}`: {1}")]
    SessionRead(String, std::io::Error),
    #[error("Could not write the file `{0}`: {1}")]
    OutputWrite(String, std::io::Error),
    #[error("Invalid log file `{0}`")]
    LogFile(String),
    #[error("Could not set the global tracing subscriber")]
    Subscriber,
}
