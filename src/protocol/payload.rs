//! JSON bodies for StartSession and TaskRequest frames.

use super::frame::Event;
use crate::config::TtsConfig;
use serde::{Deserialize, Serialize};

pub const NAMESPACE: &str = "BidirectionalTTS";

/// Body of the frames that carry no parameters.
pub const EMPTY_PAYLOAD: &[u8] = b"{}";

#[derive(Debug, Serialize)]
pub struct SessionRequest<'a> {
    pub user: User<'a>,
    pub event: i32,
    pub namespace: &'a str,
    pub req_params: ReqParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct User<'a> {
    pub uid: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ReqParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    pub speaker: &'a str,
    pub audio_params: AudioParamsBody,
}

#[derive(Debug, Serialize)]
pub struct AudioParamsBody {
    pub format: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_timestamp: Option<bool>,
}

impl<'a> SessionRequest<'a> {
    /// StartSession body: speaker and audio format, timestamps per config.
    pub fn start_session(config: &'a TtsConfig) -> Self {
        Self::build(config, Event::StartSession, None)
    }

    /// TaskRequest body: as StartSession plus the text to synthesize.
    pub fn task(config: &'a TtsConfig, text: &'a str) -> Self {
        Self::build(config, Event::TaskRequest, Some(text))
    }

    fn build(config: &'a TtsConfig, event: Event, text: Option<&'a str>) -> Self {
        let enable_timestamp = match event {
            Event::StartSession => Some(config.audio.enable_timestamp),
            _ => None,
        };
        Self {
            user: User { uid: &config.uid },
            event: event.code(),
            namespace: NAMESPACE,
            req_params: ReqParams {
                text,
                speaker: &config.speaker,
                audio_params: AudioParamsBody {
                    format: config.audio.format.to_string(),
                    sample_rate: config.audio.sample_rate,
                    enable_timestamp,
                },
            },
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Metadata the service attaches to failure and finish events.
#[derive(Debug, Default, Deserialize)]
pub struct ResponseMeta {
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResponseMeta {
    /// Best-effort human readable description of a metadata string.
    pub fn describe(raw: &str) -> String {
        match serde_json::from_str::<ResponseMeta>(raw) {
            Ok(ResponseMeta {
                status_code: Some(code),
                message: Some(message),
            }) => format!("{} (status {})", message, code),
            Ok(ResponseMeta {
                message: Some(message),
                ..
            }) => message,
            _ => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_start_session_shape() {
        let config = TtsConfig::new("app", "token");
        let body: Value =
            serde_json::from_slice(&SessionRequest::start_session(&config).to_bytes().unwrap())
                .unwrap();
        assert_eq!(
            body,
            json!({
                "user": {"uid": "123456"},
                "event": 100,
                "namespace": "BidirectionalTTS",
                "req_params": {
                    "speaker": "zh_female_shuangkuaisisi_moon_bigtts",
                    "audio_params": {
                        "format": "mp3",
                        "sample_rate": 24000,
                        "enable_timestamp": true
                    }
                }
            })
        );
    }

    #[test]
    fn test_task_request_shape() {
        let config = TtsConfig::new("app", "token");
        let body: Value =
            serde_json::from_slice(&SessionRequest::task(&config, "hello").to_bytes().unwrap())
                .unwrap();
        assert_eq!(body["event"], 200);
        assert_eq!(body["req_params"]["text"], "hello");
        assert_eq!(body["req_params"]["audio_params"]["format"], "mp3");
        assert!(body["req_params"]["audio_params"]
            .get("enable_timestamp")
            .is_none());
    }

    #[test]
    fn test_describe_meta() {
        assert_eq!(
            ResponseMeta::describe(r#"{"status_code":55000000,"message":"quota exceeded"}"#),
            "quota exceeded (status 55000000)"
        );
        assert_eq!(ResponseMeta::describe(r#"{"message":"bad speaker"}"#), "bad speaker");
        assert_eq!(ResponseMeta::describe("not json"), "not json");
    }
}
