//! Post classification and payload extraction.
//!
//! Both steps are pure: the same post always maps to the same type and
//! payload, and classification never fails.

use std::collections::BTreeMap;

use chrono::Utc;
use webhub_types::{
    ForumPost, ImagePayload, Payload, TaskType, TtsPayload, VideoPayload, VoiceClonePayload, meta,
};

use crate::config::ClassifierConfig;

const AUDIO_EXTENSIONS: &[&str] = &[".wav", ".mp3", ".flac", ".m4a", ".ogg", ".aac"];
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".bmp"];

/// Keyword rules, matched case-insensitively against title and content.
///
/// Precedence: voice clone, then TTS, then image, then the fallback type.
#[derive(Debug, Clone)]
pub struct Classifier {
    voice_clone: Vec<String>,
    tts: Vec<String>,
    image: Vec<String>,
    fallback: TaskType,
}

impl Classifier {
    pub fn new(cfg: &ClassifierConfig) -> Self {
        let lower = |words: &[String]| {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            voice_clone: lower(&cfg.voice_clone_keywords),
            tts: lower(&cfg.tts_keywords),
            image: lower(&cfg.image_keywords),
            fallback: cfg.fallback,
        }
    }

    pub fn classify(&self, post: &ForumPost) -> TaskType {
        let haystack = format!("{}\n{}", post.title, post.content).to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| haystack.contains(w.as_str()));

        if hit(&self.voice_clone) {
            TaskType::VoiceClone
        } else if hit(&self.tts) {
            TaskType::Tts
        } else if hit(&self.image) {
            TaskType::Image
        } else {
            self.fallback
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

fn has_extension(url: &str, extensions: &[&str]) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    extensions.iter().any(|ext| path.ends_with(ext))
}

/// Attachments with a matching extension, or all of them when none match.
fn pick_attachments(post: &ForumPost, extensions: &[&str]) -> Vec<String> {
    let matching: Vec<String> = post
        .attachment_urls
        .iter()
        .filter(|u| has_extension(u, extensions))
        .cloned()
        .collect();
    if matching.is_empty() {
        post.attachment_urls.clone()
    } else {
        matching
    }
}

fn text_or_title(post: &ForumPost) -> String {
    let content = post.content.trim();
    if content.is_empty() {
        post.title.trim().to_owned()
    } else {
        content.to_owned()
    }
}

/// Build the typed payload for `task_type` from `post`.
pub fn extract_payload(post: &ForumPost, task_type: TaskType) -> Payload {
    match task_type {
        TaskType::Tts => Payload::Tts(TtsPayload {
            text: text_or_title(post),
            title: post.title.clone(),
        }),
        TaskType::VoiceClone => Payload::VoiceClone(VoiceClonePayload {
            title: post.title.clone(),
            text: post.content.trim().to_owned(),
            audio_urls: pick_attachments(post, AUDIO_EXTENSIONS),
        }),
        TaskType::Video => {
            let video_urls = post.attachment_urls.clone();
            let video_url = video_urls
                .first()
                .cloned()
                .unwrap_or_else(|| post.thread_url.clone());
            Payload::Video(VideoPayload {
                video_url,
                video_urls,
            })
        }
        TaskType::Image => Payload::Image(ImagePayload {
            prompt: text_or_title(post),
            image_urls: pick_attachments(post, IMAGE_EXTENSIONS),
        }),
    }
}

/// Forum context the reply path needs later.
pub fn post_metadata(forum: &str, post: &ForumPost) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(meta::FORUM_NAME.to_owned(), forum.to_owned());
    metadata.insert(meta::POST_ID.to_owned(), post.id.clone());
    metadata.insert(meta::TITLE.to_owned(), post.title.clone());
    metadata.insert(meta::AUTHOR.to_owned(), post.author.clone());
    if !post.thread_url.is_empty() {
        metadata.insert(meta::THREAD_URL.to_owned(), post.thread_url.clone());
    }
    metadata.insert(meta::DISCOVERED_AT.to_owned(), Utc::now().to_rfc3339());
    metadata
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn post(title: &str, content: &str, attachments: &[&str]) -> ForumPost {
        ForumPost {
            id: "1".into(),
            title: title.into(),
            content: content.into(),
            author: "alice".into(),
            timestamp: None,
            thread_url: "https://forum.example/thread-1-1-1.html".into(),
            attachment_urls: attachments.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn voice_clone_beats_tts() {
        let c = Classifier::default();
        assert_eq!(c.classify(&post("【音色克隆】Demo", "", &[])), TaskType::VoiceClone);
        // "配音" is a TTS keyword, but the clone keyword wins.
        assert_eq!(
            c.classify(&post("配音 + 声音克隆", "", &[])),
            TaskType::VoiceClone
        );
    }

    #[test]
    fn tts_keyword_in_content_is_case_insensitive() {
        let c = Classifier::default();
        assert_eq!(c.classify(&post("help", "please TTS this", &[])), TaskType::Tts);
        assert_eq!(c.classify(&post("Voice Clone me", "", &[])), TaskType::VoiceClone);
    }

    #[test]
    fn unmatched_posts_take_the_fallback() {
        let c = Classifier::default();
        assert_eq!(c.classify(&post("剪辑一下", "谢谢", &[])), TaskType::Video);

        let cfg = ClassifierConfig {
            fallback: TaskType::Image,
            ..ClassifierConfig::default()
        };
        assert_eq!(Classifier::new(&cfg).classify(&post("?", "", &[])), TaskType::Image);
    }

    #[test]
    fn voice_clone_payload_prefers_audio_attachments() {
        let p = post(
            "【音色克隆】Demo",
            "读这段",
            &["https://cdn.example/a.png", "https://cdn.example/ref.WAV?x=1"],
        );
        let Payload::VoiceClone(payload) = extract_payload(&p, TaskType::VoiceClone) else {
            panic!("wrong variant");
        };
        assert_eq!(payload.audio_urls, vec!["https://cdn.example/ref.WAV?x=1".to_owned()]);
        assert_eq!(payload.text, "读这段");
    }

    #[test]
    fn video_payload_falls_back_to_thread_url() {
        let p = post("剪辑", "", &[]);
        let Payload::Video(payload) = extract_payload(&p, TaskType::Video) else {
            panic!("wrong variant");
        };
        assert_eq!(payload.video_url, p.thread_url);
        assert!(payload.video_urls.is_empty());
    }

    #[test]
    fn tts_text_falls_back_to_title() {
        let p = post("朗读：春晓", "  ", &[]);
        let Payload::Tts(payload) = extract_payload(&p, TaskType::Tts) else {
            panic!("wrong variant");
        };
        assert_eq!(payload.text, "朗读：春晓");
    }

    #[test]
    fn metadata_carries_forum_context() {
        let m = post_metadata("main", &post("t", "c", &[]));
        assert_eq!(m.get(meta::FORUM_NAME).map(String::as_str), Some("main"));
        assert_eq!(m.get(meta::POST_ID).map(String::as_str), Some("1"));
        assert_eq!(m.get(meta::AUTHOR).map(String::as_str), Some("alice"));
        assert!(m.contains_key(meta::THREAD_URL));
        assert!(m.contains_key(meta::DISCOVERED_AT));
    }

    proptest! {
        #[test]
        fn classify_is_total_and_deterministic(title in ".{0,40}", content in ".{0,200}") {
            let c = Classifier::default();
            let p = post(&title, &content, &[]);
            let first = c.classify(&p);
            prop_assert_eq!(first, c.classify(&p.clone()));
            prop_assert_eq!(extract_payload(&p, first).task_type(), first);
        }
    }
}
