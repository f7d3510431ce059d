use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "wss://openspeech.bytedance.com/api/v3/tts/bidirection";
pub const DEFAULT_RESOURCE_ID: &str = "volc.service_type.10029";
pub const DEFAULT_SPEAKER: &str = "zh_female_shuangkuaisisi_moon_bigtts";
pub const DEFAULT_UID: &str = "123456";

/// Input that ends a conversation turn without synthesizing anything.
pub const SENTINEL_TEXT: &str = "${{over}}$";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Output encoding requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum AudioFormat {
    #[strum(serialize = "mp3")]
    Mp3,
    #[strum(serialize = "pcm")]
    Pcm,
    #[strum(serialize = "ogg_opus")]
    OggOpus,
}

/// What to do when an outgoing frame could not be built or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendFailurePolicy {
    /// Log the failure and keep the call running; the frame is simply not sent.
    #[default]
    LogAndContinue,
    /// Resolve the call with the error.
    FailCall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParams {
    pub format: AudioFormat,
    pub sample_rate: u32,
    /// Ask for sentence timestamps in the session request.
    pub enable_timestamp: bool,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            sample_rate: 24000,
            enable_timestamp: true,
        }
    }
}

/// Connection-level timing, fixed for every call made with a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub ping_interval: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            ping_interval: Duration::from_secs(50),
            read: Duration::from_secs(300),
            write: Duration::from_secs(300),
        }
    }
}

/// Immutable client configuration, shared read-only by all calls.
#[derive(Debug)]
pub struct TtsConfig {
    pub endpoint: String,
    pub app_id: String,
    pub access_token: SecretBox<String>,
    pub resource_id: String,
    pub speaker: String,
    pub uid: String,
    pub audio: AudioParams,
    pub timeouts: Timeouts,
    pub send_failure_policy: SendFailurePolicy,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: String::new(),
            access_token: SecretBox::new(Box::new(String::new())),
            resource_id: DEFAULT_RESOURCE_ID.to_string(),
            speaker: DEFAULT_SPEAKER.to_string(),
            uid: DEFAULT_UID.to_string(),
            audio: AudioParams::default(),
            timeouts: Timeouts::default(),
            send_failure_policy: SendFailurePolicy::default(),
        }
    }
}

impl TtsConfig {
    pub fn new(app_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            access_token: SecretBox::new(Box::new(access_token.into())),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables (and `.env` if present).
    ///
    /// Required: `VOLC_TTS_APP_ID`, `VOLC_TTS_ACCESS_TOKEN`.
    /// Optional: `VOLC_TTS_ENDPOINT`, `VOLC_TTS_RESOURCE_ID`, `VOLC_TTS_SPEAKER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let app_id = Self::required_var("VOLC_TTS_APP_ID")?;
        let access_token = Self::required_var("VOLC_TTS_ACCESS_TOKEN")?;
        let mut config = Self::new(app_id, access_token);

        if let Ok(endpoint) = env::var("VOLC_TTS_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(resource_id) = env::var("VOLC_TTS_RESOURCE_ID") {
            config.resource_id = resource_id;
        }
        if let Ok(speaker) = env::var("VOLC_TTS_SPEAKER") {
            config.speaker = speaker;
        }

        config.validate()?;
        Ok(config)
    }

    fn required_var(name: &str) -> Result<String, ConfigError> {
        let value = env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: name.to_string(),
                reason: "value cannot be empty".to_string(),
            });
        }
        Ok(value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = url::Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidValue {
            name: "endpoint".to_string(),
            reason: format!("'{}' is not a URL: {}", self.endpoint, e),
        })?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidValue {
                name: "endpoint".to_string(),
                reason: format!("expected a ws:// or wss:// URL, got '{}'", self.endpoint),
            });
        }
        if self.speaker.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "speaker".to_string(),
                reason: "speaker cannot be empty".to_string(),
            });
        }
        if self.timeouts.ping_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "ping_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Access token (use only when opening a connection)
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<TtsConfig, ConfigError> {
    match TtsConfig::from_env() {
        Ok(config) => {
            log::info!("Successfully loaded TTS configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_value_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::str::FromStr;

    fn clear_env() {
        for var in [
            "VOLC_TTS_APP_ID",
            "VOLC_TTS_ACCESS_TOKEN",
            "VOLC_TTS_ENDPOINT",
            "VOLC_TTS_RESOURCE_ID",
            "VOLC_TTS_SPEAKER",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = TtsConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.resource_id, "volc.service_type.10029");
        assert_eq!(config.speaker, DEFAULT_SPEAKER);
        assert_eq!(config.audio.format, AudioFormat::Mp3);
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.timeouts.ping_interval, Duration::from_secs(50));
        assert_eq!(config.timeouts.read, Duration::from_secs(300));
        assert_eq!(config.timeouts.write, Duration::from_secs(300));
        assert_eq!(config.send_failure_policy, SendFailurePolicy::LogAndContinue);
    }

    #[test]
    fn test_access_token_is_redacted_in_debug() {
        let config = TtsConfig::new("app", "super-secret-token");
        assert_eq!(config.access_token(), "super-secret-token");
        assert!(!format!("{:?}", config).contains("super-secret-token"));
    }

    #[test]
    fn test_audio_format_names() {
        assert_eq!(AudioFormat::Mp3.to_string(), "mp3");
        assert_eq!(AudioFormat::OggOpus.to_string(), "ogg_opus");
        assert_eq!(AudioFormat::from_str("pcm").unwrap(), AudioFormat::Pcm);
        assert!(AudioFormat::from_str("flac").is_err());
    }

    #[test]
    fn test_validate_rejects_http_endpoint() {
        let mut config = TtsConfig::new("app", "token");
        config.endpoint = "https://example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("VOLC_TTS_APP_ID", "1234567");
        env::set_var("VOLC_TTS_ACCESS_TOKEN", "token-abc");
        env::set_var("VOLC_TTS_SPEAKER", "en_female_test");

        let config = TtsConfig::from_env().unwrap();
        assert_eq!(config.app_id, "1234567");
        assert_eq!(config.access_token(), "token-abc");
        assert_eq!(config.speaker, "en_female_test");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_token() {
        clear_env();
        env::set_var("VOLC_TTS_APP_ID", "1234567");
        assert!(matches!(
            TtsConfig::from_env(),
            Err(ConfigError::MissingEnvVar(var)) if var == "VOLC_TTS_ACCESS_TOKEN"
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_blank_app_id() {
        clear_env();
        env::set_var("VOLC_TTS_APP_ID", "   ");
        env::set_var("VOLC_TTS_ACCESS_TOKEN", "token");
        assert!(matches!(
            TtsConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
        clear_env();
    }
}
