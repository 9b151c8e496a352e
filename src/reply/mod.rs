//! Reply generator adapter.
//!
//! Wraps the remote generation service. Context composition is
//! deterministic (forever memory first, then same-target session history
//! most-recent-first, then the new messages) while the produced text
//! itself is opaque model output.

use thiserror::Error;

use crate::history::SessionRecord;
use crate::model::{MessageBuilder, ModelClient, ModelConfig, ModelError};
use crate::transcript::{Message, Sender};

/// System prompt for the generation service.
pub const REPLY_SYSTEM_PROMPT: &str = "你是用户的聊天代理人，代替用户回复消息。\
根据长期记忆、最近的会话记录和对方刚发来的消息，用用户的口吻生成一条自然、简短的中文回复。\
只输出回复正文，不要任何解释或前缀。";

/// Everything the generator needs for one reply.
#[derive(Debug, Clone, Default)]
pub struct ReplyRequest {
    pub new_messages: Vec<Message>,
    /// Same-target session history, most recent first.
    pub session_history: Vec<SessionRecord>,
    /// Free-chat history, most recent first.
    pub free_chat_history: Vec<SessionRecord>,
    pub forever_memory: String,
}

/// Reply generation errors.
#[derive(Error, Debug)]
pub enum ReplyError {
    #[error("generation service error: {0}")]
    Service(#[from] ModelError),
    #[error("reply requested with no new messages")]
    EmptyInput,
}

/// Contract for the generation step.
pub trait ReplyGenerator: Send + Sync {
    fn generate(
        &self,
        request: &ReplyRequest,
    ) -> impl std::future::Future<Output = Result<String, ReplyError>> + Send;
}

/// Generator backed by the remote generation service.
pub struct ModelReplyGenerator {
    client: ModelClient,
}

impl ModelReplyGenerator {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: ModelClient::new(config),
        }
    }
}

impl ReplyGenerator for ModelReplyGenerator {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, ReplyError> {
        if request.new_messages.is_empty() {
            return Err(ReplyError::EmptyInput);
        }

        let messages = vec![
            MessageBuilder::create_system_message(REPLY_SYSTEM_PROMPT),
            MessageBuilder::create_user_message(&compose_context(request)),
        ];

        Ok(self.client.request(&messages).await?)
    }
}

/// Deterministic context layout: forever memory, then most-recent-first
/// session history, then the new messages in transcript order.
pub fn compose_context(request: &ReplyRequest) -> String {
    let mut sections = Vec::new();

    if !request.forever_memory.trim().is_empty() {
        sections.push(format!("【长期记忆】\n{}", request.forever_memory.trim()));
    }

    if !request.session_history.is_empty() {
        let lines: Vec<String> = request
            .session_history
            .iter()
            .map(|r| format!("- [{}] {}", r.timestamp.format("%Y-%m-%d %H:%M"), r.payload))
            .collect();
        sections.push(format!("【最近会话记录（从新到旧）】\n{}", lines.join("\n")));
    }

    if !request.free_chat_history.is_empty() {
        let lines: Vec<String> = request
            .free_chat_history
            .iter()
            .map(|r| format!("- {}", r.payload))
            .collect();
        sections.push(format!("【最近闲聊记录（从新到旧）】\n{}", lines.join("\n")));
    }

    let lines: Vec<String> = request
        .new_messages
        .iter()
        .map(|m| {
            let who = match m.sender {
                Sender::Mine => "我",
                Sender::Theirs => "对方",
                Sender::Unknown => "未知",
            };
            format!("{}: {}", who, m.text)
        })
        .collect();
    sections.push(format!("【刚收到的新消息】\n{}", lines.join("\n")));

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(text: &str, sender: Sender) -> Message {
        Message {
            text: text.to_string(),
            sender,
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn test_context_section_order() {
        let request = ReplyRequest {
            new_messages: vec![msg("晚上吃饭吗", Sender::Theirs)],
            session_history: vec![SessionRecord::chat_session("微信", "张三", "昨天聊了电影")],
            free_chat_history: vec![SessionRecord::free_chat("问过天气")],
            forever_memory: "回复要简短".to_string(),
        };

        let context = compose_context(&request);
        let memory_pos = context.find("长期记忆").unwrap();
        let session_pos = context.find("最近会话记录").unwrap();
        let new_pos = context.find("刚收到的新消息").unwrap();
        assert!(memory_pos < session_pos);
        assert!(session_pos < new_pos);
        assert!(context.contains("对方: 晚上吃饭吗"));
    }

    #[test]
    fn test_empty_sections_omitted() {
        let request = ReplyRequest {
            new_messages: vec![msg("在吗", Sender::Theirs)],
            ..Default::default()
        };
        let context = compose_context(&request);
        assert!(!context.contains("长期记忆"));
        assert!(!context.contains("最近会话记录"));
        assert!(context.contains("刚收到的新消息"));
    }

    #[tokio::test]
    async fn test_empty_new_messages_rejected() {
        let generator = ModelReplyGenerator::new(ModelConfig::default());
        let result = generator.generate(&ReplyRequest::default()).await;
        assert!(matches!(result, Err(ReplyError::EmptyInput)));
    }
}
