use std::fmt;

#[derive(Debug)]
pub enum TimegrapherError {
    InvalidConfig(String),
    Json(serde_json::Error),
    InvalidReferenceTime(String),
    #[cfg(feature = "wav")]
    Wav(hound::Error),
    #[cfg(feature = "network")]
    Http(reqwest::Error),
}

impl fmt::Display for TimegrapherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimegrapherError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            TimegrapherError::Json(e) => write!(f, "JSON error: {e}"),
            TimegrapherError::InvalidReferenceTime(text) => {
                write!(f, "Invalid reference time '{text}'")
            }
            #[cfg(feature = "wav")]
            TimegrapherError::Wav(e) => write!(f, "WAV error: {e}"),
            #[cfg(feature = "network")]
            TimegrapherError::Http(e) => write!(f, "HTTP error: {e}"),
        }
    }
}

impl std::error::Error for TimegrapherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimegrapherError::Json(e) => Some(e),
            #[cfg(feature = "wav")]
            TimegrapherError::Wav(e) => Some(e),
            #[cfg(feature = "network")]
            TimegrapherError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TimegrapherError {
    fn from(e: serde_json::Error) -> Self {
        TimegrapherError::Json(e)
    }
}

#[cfg(feature = "wav")]
impl From<hound::Error> for TimegrapherError {
    fn from(e: hound::Error) -> Self {
        TimegrapherError::Wav(e)
    }
}

#[cfg(feature = "network")]
impl From<reqwest::Error> for TimegrapherError {
    fn from(e: reqwest::Error) -> Self {
        TimegrapherError::Http(e)
    }
}
