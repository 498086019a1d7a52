//! Typed task inputs, one struct per [`TaskType`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("{task_type} payload is missing required field `{field}`")]
    MissingField {
        task_type: TaskType,
        field: &'static str,
    },
    #[error("payload kind `{kind}` does not match task type `{expected}`")]
    KindMismatch { kind: TaskType, expected: TaskType },
}

/// Behaviour shared by every payload variant.
pub trait TaskPayload {
    const TASK_TYPE: TaskType;

    /// Check the fields a worker cannot do without.
    fn validate(&self) -> Result<(), PayloadError>;
}

fn require(task_type: TaskType, field: &'static str, value: &str) -> Result<(), PayloadError> {
    if value.trim().is_empty() {
        return Err(PayloadError::MissingField { task_type, field });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsPayload {
    pub text: String,
    #[serde(default)]
    pub title: String,
}

impl TaskPayload for TtsPayload {
    const TASK_TYPE: TaskType = TaskType::Tts;

    fn validate(&self) -> Result<(), PayloadError> {
        require(Self::TASK_TYPE, "text", &self.text)
    }
}

/// Reference audio plus the text to speak in the cloned voice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceClonePayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub audio_urls: Vec<String>,
}

impl TaskPayload for VoiceClonePayload {
    const TASK_TYPE: TaskType = TaskType::VoiceClone;

    fn validate(&self) -> Result<(), PayloadError> {
        if self.title.trim().is_empty() && self.text.trim().is_empty() {
            return Err(PayloadError::MissingField {
                task_type: Self::TASK_TYPE,
                field: "text",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPayload {
    pub video_url: String,
    #[serde(default)]
    pub video_urls: Vec<String>,
}

impl TaskPayload for VideoPayload {
    const TASK_TYPE: TaskType = TaskType::Video;

    fn validate(&self) -> Result<(), PayloadError> {
        require(Self::TASK_TYPE, "video_url", &self.video_url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub prompt: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

impl TaskPayload for ImagePayload {
    const TASK_TYPE: TaskType = TaskType::Image;

    fn validate(&self) -> Result<(), PayloadError> {
        require(Self::TASK_TYPE, "prompt", &self.prompt)
    }
}

/// A task's input. The variant always agrees with the task's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Tts(TtsPayload),
    VoiceClone(VoiceClonePayload),
    Video(VideoPayload),
    Image(ImagePayload),
}

impl Payload {
    pub fn task_type(&self) -> TaskType {
        match self {
            Payload::Tts(_) => TtsPayload::TASK_TYPE,
            Payload::VoiceClone(_) => VoiceClonePayload::TASK_TYPE,
            Payload::Video(_) => VideoPayload::TASK_TYPE,
            Payload::Image(_) => ImagePayload::TASK_TYPE,
        }
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            Payload::Tts(p) => p.validate(),
            Payload::VoiceClone(p) => p.validate(),
            Payload::Video(p) => p.validate(),
            Payload::Image(p) => p.validate(),
        }
    }

    /// Validate and additionally require the variant to match `expected`.
    pub fn validate_for(&self, expected: TaskType) -> Result<(), PayloadError> {
        let kind = self.task_type();
        if kind != expected {
            return Err(PayloadError::KindMismatch { kind, expected });
        }
        self.validate()
    }

    /// Flat field map without the `kind` tag, as handed to processing
    /// adapters.
    pub fn fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let value = match self {
            Payload::Tts(p) => serde_json::to_value(p),
            Payload::VoiceClone(p) => serde_json::to_value(p),
            Payload::Video(p) => serde_json::to_value(p),
            Payload::Image(p) => serde_json::to_value(p),
        };
        match value {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tagged_representation() {
        let payload = Payload::VoiceClone(VoiceClonePayload {
            title: "克隆我的声音".into(),
            text: "今天天气很好".into(),
            audio_urls: vec!["https://cdn.example/ref.wav".into()],
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "voice_clone");
        assert_eq!(value["audio_urls"][0], "https://cdn.example/ref.wav");
        let back: Payload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn fields_drop_the_tag() {
        let payload = Payload::Image(ImagePayload {
            prompt: "a cat".into(),
            image_urls: vec![],
        });
        let fields = payload.fields();
        assert!(!fields.contains_key("kind"));
        assert_eq!(fields["prompt"], "a cat");
    }

    #[test]
    fn empty_required_fields_are_rejected() {
        let tts = Payload::Tts(TtsPayload {
            text: "   ".into(),
            title: "t".into(),
        });
        assert_eq!(
            tts.validate(),
            Err(PayloadError::MissingField {
                task_type: TaskType::Tts,
                field: "text"
            })
        );

        let clone = Payload::VoiceClone(VoiceClonePayload::default());
        assert!(clone.validate().is_err());

        let video = Payload::Video(VideoPayload {
            video_url: "https://cdn.example/v.mp4".into(),
            video_urls: vec![],
        });
        assert!(video.validate().is_ok());
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let video = Payload::Video(VideoPayload {
            video_url: "https://cdn.example/v.mp4".into(),
            video_urls: vec![],
        });
        assert!(matches!(
            video.validate_for(TaskType::Tts),
            Err(PayloadError::KindMismatch { .. })
        ));
    }
}
