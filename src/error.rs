use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Unauthorized,
    NotConnected,
    UnexpectedStatus(u16),
    Protocol(String),
    Timeout,
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
    /// A binding was created with neither an initial value nor a getter.
    MissingState(&'static str),
    /// The characteristic has no confirmed value yet.
    NoValue(&'static str),
    InvalidValue(String),
    InvalidPollFactor(f64),
    PollerStarted,
    Remote(String),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Error::Unauthorized => true,
            Error::UnexpectedStatus(status) => *status == 401,
            Error::Http(e) => e.status().is_some_and(|s| s.as_u16() == 401),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Unauthorized => write!(f, "unauthorized (check email and password)"),
            Error::NotConnected => write!(f, "not connected"),
            Error::UnexpectedStatus(status) => write!(f, "unexpected HTTP status: {status}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "timed out waiting for remote state"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Config(msg) => write!(f, "invalid config: {msg}"),
            Error::MissingState(name) => {
                write!(f, "{name}: at least one of initial value or getter required")
            }
            Error::NoValue(name) => write!(f, "{name}: no value available yet"),
            Error::InvalidValue(msg) => write!(f, "invalid characteristic value: {msg}"),
            Error::InvalidPollFactor(factor) => {
                write!(f, "poll factor must be strictly positive (got {factor})")
            }
            Error::PollerStarted => write!(f, "poller already started"),
            Error::Remote(msg) => write!(f, "remote error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.status().is_some_and(|s| s.as_u16() == 401) {
            return Error::Unauthorized;
        }
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
