//! Model-backed classifier that wraps the remote decision service.

use serde::Deserialize;

use super::{Classification, Classifier, ClassifyError, Instruction, TaskType};
use crate::model::{strip_code_fence, MessageBuilder, ModelClient, ModelConfig};

/// System prompt for the decision service.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = r#"你是一个任务分类助手。用户会给出一条手机操作指令，你必须把它归入以下五类之一：

- free_chat: 纯聊天、问候或致谢，没有任何操作意图
- basic_operation: 仅仅打开某个应用，没有其他操作
- single_reply: 打开应用给某人回/发一条消息，但用户没有给出消息内容
- continuous_reply: 同上，但带有 auto/自动/持续 等标记，要求持续自动回复
- complex_operation: 其他多步操作，或用户已给出要发送的具体内容

只输出 JSON，不要输出其他内容。格式：
{"task_type": "...", "target_app": "...", "target_object": "...", "is_auto": false, "specific_content": ""}

target_app 是应用名（如 微信、QQ、抖音），target_object 是联系人名，
specific_content 是用户指定要发送的消息原文（引号或冒号之后的部分），没有则留空。"#;

/// Wire shape of the service's JSON reply. An unknown `task_type` tag fails
/// deserialization here and never leaks past the adapter.
#[derive(Debug, Deserialize)]
struct WireClassification {
    task_type: TaskType,
    #[serde(default)]
    target_app: String,
    #[serde(default)]
    target_object: String,
    #[serde(default)]
    is_auto: bool,
    #[serde(default)]
    specific_content: String,
}

/// Classifier backed by the remote decision service.
///
/// Retry against the service is bounded (inherited from [`ModelClient`]);
/// once the budget is exhausted, or the reply cannot be parsed into one of
/// the five task types, the instruction degrades to `free_chat` with the
/// diagnostic flag set instead of failing the whole instruction.
pub struct ModelClassifier {
    client: ModelClient,
}

impl ModelClassifier {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: ModelClient::new(config),
        }
    }

    fn parse_reply(content: &str) -> Result<Classification, ClassifyError> {
        let json = strip_code_fence(content);
        let wire: WireClassification =
            serde_json::from_str(json).map_err(|e| ClassifyError::Payload(e.to_string()))?;

        Ok(Classification {
            task_type: wire.task_type,
            target_app: wire.target_app,
            target_object: wire.target_object,
            // continuous_reply implies auto even when the service forgets the flag
            is_auto: wire.is_auto || wire.task_type == TaskType::ContinuousReply,
            specific_content: wire.specific_content,
            degraded: false,
        })
    }
}

impl Classifier for ModelClassifier {
    async fn classify(
        &self,
        instruction: &Instruction,
        context: Option<&str>,
    ) -> Result<Classification, ClassifyError> {
        let mut user_text = instruction.text.clone();
        if let Some(ctx) = context {
            user_text = format!("{}\n\n补充上下文：{}", user_text, ctx);
        }

        let messages = vec![
            MessageBuilder::create_system_message(CLASSIFIER_SYSTEM_PROMPT),
            MessageBuilder::create_user_message(&user_text),
        ];

        let content = match self.client.request(&messages).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    instruction = %instruction.id,
                    error = %e,
                    "classification service unreachable, degrading to free_chat"
                );
                return Ok(Classification::degraded_free_chat());
            }
        };

        match Self::parse_reply(&content) {
            Ok(classification) => Ok(classification),
            Err(e) => {
                tracing::warn!(
                    instruction = %instruction.id,
                    error = %e,
                    "unparsable classification reply, degrading to free_chat"
                );
                Ok(Classification::degraded_free_chat())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_plain_json() {
        let c = ModelClassifier::parse_reply(
            r#"{"task_type":"single_reply","target_app":"QQ","target_object":"黄恬","is_auto":false,"specific_content":""}"#,
        )
        .unwrap();
        assert_eq!(c.task_type, TaskType::SingleReply);
        assert_eq!(c.target_app, "QQ");
        assert_eq!(c.target_object, "黄恬");
    }

    #[test]
    fn test_parse_reply_fenced() {
        let c = ModelClassifier::parse_reply(
            "```json\n{\"task_type\":\"basic_operation\",\"target_app\":\"微信\"}\n```",
        )
        .unwrap();
        assert_eq!(c.task_type, TaskType::BasicOperation);
        assert_eq!(c.target_app, "微信");
        assert!(!c.is_auto);
    }

    #[test]
    fn test_parse_reply_unknown_tag() {
        let result = ModelClassifier::parse_reply(r#"{"task_type":"fly_to_moon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_continuous_implies_auto() {
        let c = ModelClassifier::parse_reply(
            r#"{"task_type":"continuous_reply","target_app":"微信","target_object":"张三"}"#,
        )
        .unwrap();
        assert!(c.is_auto);
    }
}
