//! Weather-subsystem error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Provider error: {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("No weather data available")]
    NoData,
}

impl From<serde_json::Error> for WeatherError {
    fn from(e: serde_json::Error) -> Self {
        WeatherError::Decode(e.to_string())
    }
}

impl WeatherError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network(_) => "Network error. Check your connection.",
            Self::Api { status, .. } if *status >= 500 => {
                "The weather service is experiencing issues. Please try again later."
            }
            Self::Api { .. } => "Weather request failed. Please try again.",
            Self::Decode(_) => "Received unreadable weather data.",
            Self::Database(_) => "Local storage error.",
            Self::NoData => "No weather data available. Connect to the internet and retry.",
        }
    }

    /// Whether this failure class is expected to clear on its own, so the
    /// fixed-interval refresh cadence is the right retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::NoData => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Database(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = WeatherError::NoData;
        assert!(err.user_message().contains("No weather data"));

        let err = WeatherError::Api { status: 503, message: "unavailable".into() };
        assert!(err.user_message().contains("try again later"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(WeatherError::NoData.is_retryable());
        assert!(WeatherError::Api { status: 500, message: String::new() }.is_retryable());
        assert!(WeatherError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!WeatherError::Api { status: 401, message: String::new() }.is_retryable());
        assert!(!WeatherError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn test_serde_error_maps_to_decode() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: WeatherError = parse_err.into();
        assert!(matches!(err, WeatherError::Decode(_)));
    }
}
