//! Keyword-rule classifier.
//!
//! Deterministic implementation of the routing rules, applied in strict
//! priority order:
//!
//! 1. thanks/greeting-only input -> free_chat
//! 2. auto marker + send intent, no literal content -> continuous_reply
//! 3. send intent + target contact, no literal content -> single_reply
//! 4. send intent + literal content (quoted or colon-delimited) -> complex_operation
//! 5. app-open keyword alone -> basic_operation
//! 6. app-open plus any non-send operation -> complex_operation
//!
//! Anything that matches no rule resolves to free_chat, the lowest-risk
//! default. Used both as the offline fallback classifier and as the ground
//! truth for routing tests.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::{Classification, Classifier, ClassifyError, Instruction, TaskType};

/// Keywords that signal intent to send or answer a chat message.
static SEND_KEYWORDS: &[&str] = &["发消息", "发信息", "发送消息", "回消息", "回复", "回个消息"];

/// Keywords that signal opening or switching to an app.
static OPEN_KEYWORDS: &[&str] = &["打开", "启动", "进入", "切换到"];

/// Markers for the continuous, unattended reply mode.
static AUTO_MARKERS: &[&str] = &["auto", "自动", "持续", "连续"];

/// Pure conversational phrases with no operational meaning.
static GREETING_PHRASES: &[&str] = &[
    "你好", "您好", "谢谢", "感谢", "辛苦了", "早上好", "晚上好", "晚安",
    "hello", "hi", "thanks", "thank you",
];

/// Known app display names, alias -> canonical form.
pub static APP_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Social & Messaging
    m.insert("微信", "微信");
    m.insert("QQ", "QQ");
    m.insert("qq", "QQ");
    m.insert("微博", "微博");
    m.insert("钉钉", "钉钉");
    m.insert("飞书", "飞书");

    // Video & Entertainment
    m.insert("抖音", "抖音");
    m.insert("快手", "快手");
    m.insert("bilibili", "bilibili");
    m.insert("哔哩哔哩", "bilibili");
    m.insert("B站", "bilibili");

    // Lifestyle
    m.insert("小红书", "小红书");
    m.insert("知乎", "知乎");
    m.insert("淘宝", "淘宝");
    m.insert("京东", "京东");
    m.insert("美团", "美团");
    m.insert("支付宝", "支付宝");
    m.insert("网易云音乐", "网易云音乐");
    m.insert("高德地图", "高德地图");

    m
});

/// Contact between the "给" particle and the send verb, e.g. 给黄恬发消息.
static CONTACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"给\s*(.+?)\s*(?:发|回)").expect("contact regex"));

/// Literal message content wrapped in quotes.
static QUOTED_CONTENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[「“\"'『]([^」”\"'』]+)[」”\"'』]").expect("quoted content regex"));

/// Literal message content after a colon, e.g. 给张三发消息：明天见.
static COLON_CONTENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[:：]\s*(.+)\s*$").expect("colon content regex"));

/// Pure keyword-rule classifier. No network, no state.
#[derive(Debug, Default, Clone)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous rule evaluation, shared by the async trait impl.
    pub fn classify_text(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();

        let has_send = SEND_KEYWORDS.iter().any(|k| text.contains(k));
        let has_open = OPEN_KEYWORDS.iter().any(|k| text.contains(k));
        let has_auto = AUTO_MARKERS.iter().any(|k| lower.contains(k));

        // Rule 1: conversational input with no operational keywords.
        let is_greeting = GREETING_PHRASES.iter().any(|k| lower.contains(k));
        if is_greeting && !has_send && !has_open {
            return Classification::free_chat();
        }

        // Auto markers would otherwise bleed into the contact capture
        // (给张三自动回复 -> 张三, not 张三自动).
        let mut stripped = text.to_string();
        for k in AUTO_MARKERS {
            stripped = stripped.replace(k, "");
            stripped = stripped.replace(&k.to_uppercase(), "");
        }

        let target_app = find_app(text);
        let target_object = extract_contact(&stripped);
        let specific_content = extract_literal_content(text);

        if has_send {
            if specific_content.is_empty() {
                // Rule 2: unattended continuous mode.
                if has_auto {
                    return Classification {
                        task_type: TaskType::ContinuousReply,
                        target_app,
                        target_object,
                        is_auto: true,
                        specific_content: String::new(),
                        degraded: false,
                    };
                }
                // Rule 3: one reply to a named contact.
                if !target_object.is_empty() {
                    return Classification {
                        task_type: TaskType::SingleReply,
                        target_app,
                        target_object,
                        is_auto: false,
                        specific_content: String::new(),
                        degraded: false,
                    };
                }
            } else {
                // Rule 4: the user dictated the message text.
                return Classification {
                    task_type: TaskType::ComplexOperation,
                    target_app,
                    target_object,
                    is_auto: false,
                    specific_content,
                    degraded: false,
                };
            }
        }

        if has_open {
            // Rule 5: nothing left once the open verb and app name are removed.
            if operation_residue(text, &target_app).is_empty() {
                return Classification {
                    task_type: TaskType::BasicOperation,
                    target_app,
                    target_object: String::new(),
                    is_auto: false,
                    specific_content: String::new(),
                    degraded: false,
                };
            }
            // Rule 6: open plus some non-send operation.
            return Classification {
                task_type: TaskType::ComplexOperation,
                target_app,
                target_object,
                is_auto: false,
                specific_content,
                degraded: false,
            };
        }

        Classification::free_chat()
    }
}

impl Classifier for RuleClassifier {
    async fn classify(
        &self,
        instruction: &Instruction,
        _context: Option<&str>,
    ) -> Result<Classification, ClassifyError> {
        Ok(self.classify_text(&instruction.text))
    }
}

/// Find the longest known app alias contained in the text.
fn find_app(text: &str) -> String {
    APP_ALIASES
        .iter()
        .filter(|(alias, _)| text.contains(*alias))
        .max_by_key(|(alias, _)| alias.len())
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_default()
}

/// Pull the contact name out of a 给<名字>发/回 construction.
fn extract_contact(text: &str) -> String {
    CONTACT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Literal message content, quoted or colon-delimited.
fn extract_literal_content(text: &str) -> String {
    if let Some(c) = QUOTED_CONTENT_RE.captures(text).and_then(|c| c.get(1)) {
        return c.as_str().trim().to_string();
    }
    COLON_CONTENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// What remains of the instruction once open verbs, app aliases and
/// punctuation are stripped. Empty residue means a bare app-open.
fn operation_residue(text: &str, app: &str) -> String {
    let mut residue = text.to_string();
    for k in OPEN_KEYWORDS {
        residue = residue.replace(k, "");
    }
    for (alias, canonical) in APP_ALIASES.iter() {
        if app == *canonical {
            residue = residue.replace(alias, "");
        }
    }
    residue
        .chars()
        .filter(|c| !c.is_whitespace() && !"，。！？!?、,.".contains(*c))
        .collect()
}
