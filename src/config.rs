use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Process-wide settings, read once at startup and handed to whoever needs them.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub request_timeout: Duration,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let string_or = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            api_key,
            api_base: string_or("GEMINI_API_BASE", DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            text_model: string_or("GEMINI_TEXT_MODEL", DEFAULT_TEXT_MODEL),
            image_model: string_or("GEMINI_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            request_timeout: Duration::from_secs(parse_or(&lookup, "GEMINI_TIMEOUT_SECS", 120)?),
            port: parse_or(&lookup, "PORT", 8080)?,
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,
        })
    }

    /// Short, log-safe prefix of the API key.
    pub fn api_key_hint(&self) -> String {
        let visible: String = self.api_key.chars().take(6).collect();
        format!("{visible}...")
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        _ => Ok(default),
    }
}
