//! Forum replies for completed tasks.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{info, warn};
use webhub_types::{Task, TaskStatus, TaskType, meta};

use crate::error::RelayError;
use crate::forum::ForumHub;

const DEFAULT_FORUM: &str = "main";
const DOWNLOAD_PLACEHOLDER: &str = "[下载链接]";
/// Replied tasks remembered in-process after their flag is recorded.
const REPLIED_MEMORY: usize = 1024;

/// A reply ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    pub content: String,
    pub attachments: Vec<String>,
}

fn result_str<'a>(result: Option<&'a Value>, key: &str) -> Option<&'a str> {
    result?.get(key)?.as_str()
}

fn duration_text(result: Option<&Value>) -> String {
    match result.and_then(|r| r.get("duration")).and_then(Value::as_f64) {
        Some(secs) => format!("{secs:.1} 秒"),
        None => "未知".to_owned(),
    }
}

/// Build the reply for `task` from its metadata and result.
///
/// An adapter-supplied `reply_text` in the result replaces the default body.
pub fn build_reply(task: &Task) -> ReplyMessage {
    let result = task.result.as_ref();
    let attachments = task.output_files.clone();

    if let Some(text) = result_str(result, "reply_text").filter(|t| !t.trim().is_empty()) {
        return ReplyMessage {
            content: text.to_owned(),
            attachments,
        };
    }

    let author = task
        .metadata
        .get(meta::AUTHOR)
        .filter(|a| !a.is_empty())
        .map(|a| format!("@{a} "))
        .unwrap_or_default();
    let title = task.metadata.get(meta::TITLE).cloned().unwrap_or_default();
    let link = result_str(result, "download_url")
        .map(str::to_owned)
        .or_else(|| task.output_files.first().cloned())
        .unwrap_or_else(|| DOWNLOAD_PLACEHOLDER.to_owned());

    let content = match task.task_type {
        TaskType::Tts => format!(
            "✅ {author}您的TTS请求已处理完成！\n\n\
             📋 标题：{title}\n\
             🎵 音频时长：{}\n\
             📁 下载链接：{link}\n\n\
             感谢使用！",
            duration_text(result)
        ),
        TaskType::VoiceClone => {
            let voice = result_str(result, "voice_name").unwrap_or(title.as_str());
            format!(
                "✅ {author}您的音色克隆请求已处理完成！\n\n\
                 🎤 音色名称：{voice}\n\
                 🎵 试听时长：{}\n\
                 📁 下载链接：{link}\n\n\
                 感谢使用！",
                duration_text(result)
            )
        }
        TaskType::Video => {
            let mut lines = vec![format!("✅ {author}视频处理完成！")];
            if let Some(url) = &task.source_url {
                lines.push(format!("原始链接：{url}"));
            }
            lines.push(format!("输出文件数量：{}", task.output_files.len()));
            lines.push("感谢使用自动化处理服务。".to_owned());
            lines.join("\n")
        }
        TaskType::Image => format!(
            "✅ {author}图片生成完成！\n共 {} 张图片。",
            task.output_files.len()
        ),
    };

    ReplyMessage {
        content,
        attachments,
    }
}

#[derive(Default)]
struct Claims {
    /// Tasks with a reply in flight or recently posted.
    ids: HashSet<String>,
    /// Posted tasks, oldest first; bounded by `remember`.
    posted: VecDeque<String>,
}

/// Posts completion replies through the shared [`ForumHub`].
pub struct ReplyManager {
    hub: Arc<ForumHub>,
    claims: Mutex<Claims>,
    remember: usize,
}

impl ReplyManager {
    pub fn new(hub: Arc<ForumHub>) -> Self {
        Self::with_memory(hub, REPLIED_MEMORY)
    }

    pub(crate) fn with_memory(hub: Arc<ForumHub>, remember: usize) -> Self {
        Self {
            hub,
            claims: Mutex::new(Claims::default()),
            remember,
        }
    }

    fn claim(&self, id: &str) -> bool {
        self.claims
            .lock()
            .map(|mut c| c.ids.insert(id.to_owned()))
            .unwrap_or(false)
    }

    fn unclaim(&self, id: &str) {
        if let Ok(mut c) = self.claims.lock() {
            c.ids.remove(id);
        }
    }

    /// Keep a posted task claimed until it ages out of the window.
    fn posted(&self, id: &str) {
        if let Ok(mut c) = self.claims.lock() {
            c.posted.push_back(id.to_owned());
            while c.posted.len() > self.remember {
                if let Some(old) = c.posted.pop_front() {
                    c.ids.remove(&old);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn claimed(&self) -> usize {
        self.claims.lock().map(|c| c.ids.len()).unwrap_or_default()
    }

    /// Post the reply for a completed task.
    ///
    /// Returns `Ok(false)` without posting when the task is not completed,
    /// is already replied, has no post to reply to, or another call for it
    /// is in flight or was recently posted. A failed post releases the
    /// claim so a later call may try again.
    pub async fn reply_for_task(&self, task: &Task) -> Result<bool, RelayError> {
        if task.status != TaskStatus::Completed || task.replied {
            return Ok(false);
        }
        let Some(thread_id) = task.post_id() else {
            return Ok(false);
        };
        if !self.claim(&task.id) {
            return Ok(false);
        }

        let forum = task.forum_name().unwrap_or(DEFAULT_FORUM);
        let message = build_reply(task);
        let posted = async {
            self.hub.ensure_logged_in(forum).await?;
            self.hub
                .post_reply(forum, thread_id, &message.content, &message.attachments)
                .await
        }
        .await;

        match posted {
            Ok(true) => {
                self.posted(&task.id);
                info!(task_id = %task.id, forum, thread_id, "reply posted");
                Ok(true)
            }
            Ok(false) => {
                self.unclaim(&task.id);
                warn!(task_id = %task.id, forum, thread_id, "forum refused reply");
                Ok(false)
            }
            Err(e) => {
                self.unclaim(&task.id);
                Err(e)
            }
        }
    }
}
