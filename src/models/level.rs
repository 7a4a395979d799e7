use serde::{Deserialize, Serialize};

/// Log level accepted by the operator and admission webhooks (`--zap-log-level`).
///
/// Anything outside the recognized set, including the empty string, normalizes
/// to [`LogLevel::DEFAULT`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    pub const DEFAULT: Self = Self::Info;
    pub const ALL: [Self; 3] = [Self::Debug, Self::Info, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn normalize(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Self::DEFAULT)
    }
}

/// Log encoder (`--zap-encoder`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogEncoder {
    Json,
    Console,
}

impl LogEncoder {
    pub const DEFAULT: Self = Self::Console;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Console => "console",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Self::Json),
            "console" => Some(Self::Console),
            _ => None,
        }
    }

    pub fn normalize(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Self::DEFAULT)
    }
}

/// Timestamp encoding of log lines (`--zap-time-encoding`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeEncoding {
    Epoch,
    Millis,
    Nano,
    Iso8601,
    Rfc3339,
    Rfc3339Nano,
}

impl TimeEncoding {
    pub const DEFAULT: Self = Self::Rfc3339;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epoch => "epoch",
            Self::Millis => "millis",
            Self::Nano => "nano",
            Self::Iso8601 => "iso8601",
            Self::Rfc3339 => "rfc3339",
            Self::Rfc3339Nano => "rfc3339nano",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "epoch" => Some(Self::Epoch),
            "millis" => Some(Self::Millis),
            "nano" => Some(Self::Nano),
            "iso8601" => Some(Self::Iso8601),
            "rfc3339" => Some(Self::Rfc3339),
            "rfc3339nano" => Some(Self::Rfc3339Nano),
            _ => None,
        }
    }

    pub fn normalize(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Self::DEFAULT)
    }
}

/// klog verbosity of the metrics server (`--v`), `0..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verbosity(u8);

impl Verbosity {
    pub const MAX: u8 = 10;

    pub fn from_str(s: &str) -> Option<Self> {
        match s.parse::<u8>() {
            Ok(v) if v <= Self::MAX => Some(Self(v)),
            _ => None,
        }
    }

    pub fn normalize(s: &str) -> Self {
        Self::from_str(s).unwrap_or_default()
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Verbosity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_recognized_values_pass_through() {
        for level in LogLevel::ALL {
            assert_eq!(LogLevel::normalize(level.as_str()), level);
        }
    }

    #[test]
    fn log_level_unrecognized_values_fall_back_to_info() {
        assert_eq!(LogLevel::normalize(""), LogLevel::Info);
        assert_eq!(LogLevel::normalize("foo"), LogLevel::Info);
        assert_eq!(LogLevel::normalize("DEBUG"), LogLevel::Info);
    }

    #[test]
    fn encoders_normalize_to_defaults() {
        assert_eq!(LogEncoder::normalize("json"), LogEncoder::Json);
        assert_eq!(LogEncoder::normalize("yaml"), LogEncoder::Console);
        assert_eq!(TimeEncoding::normalize("epoch"), TimeEncoding::Epoch);
        assert_eq!(TimeEncoding::normalize(""), TimeEncoding::Rfc3339);
    }

    #[test]
    fn verbosity_is_bounded() {
        assert_eq!(Verbosity::normalize("4").value(), 4);
        assert_eq!(Verbosity::normalize("10").value(), 10);
        assert_eq!(Verbosity::normalize("11").value(), 0);
        assert_eq!(Verbosity::normalize("-1").value(), 0);
        assert_eq!(Verbosity::normalize("loud").to_string(), "0");
    }
}
