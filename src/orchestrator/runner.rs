//! The orchestrating state machine.
//!
//! One instruction flows `Idle -> Classifying -> Exec<task type> ->
//! Completed | Failed`; the branch is determined solely by the
//! classification's task type. Within one instruction every step is strictly
//! sequential; concurrency exists only between instructions (each runs on
//! its own tokio task).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::continuous::{CycleState, LoopConfig, LoopEnd};
use super::{CancelToken, Clock, TokioClock};
use crate::decision::{Classification, Classifier, Instruction, TaskType};
use crate::device::DeviceOperator;
use crate::history::{ForeverMemory, HistoryStore, SessionRecord};
use crate::reply::{ReplyGenerator, ReplyRequest};
use crate::transcript::{parse_transcript, Attributor, Bubble, ExtractionResult, Message, Sender};

/// How many same-target session records feed the reply context.
const RECENT_SESSION_LIMIT: usize = 5;

/// How many free-chat records feed the reply context.
const RECENT_FREE_CHAT_LIMIT: usize = 5;

/// Terminal outcome of one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed(String),
}

/// What the orchestrator emits per completed instruction: the final reply
/// content (when one was produced) and a status string. These are the sole
/// integration points for optional readout or notification layers.
#[derive(Debug, Clone)]
pub struct InstructionReport {
    pub instruction_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub reply_text: Option<String>,
    /// True when classification fell back to free chat after the decision
    /// service stayed unreachable.
    pub degraded: bool,
}

impl InstructionReport {
    /// Human-readable status string.
    pub fn status_line(&self) -> String {
        match &self.status {
            TaskStatus::Completed => format!("[{}] 完成", self.task_type.as_str()),
            TaskStatus::Failed(reason) => {
                format!("[{}] 失败: {}", self.task_type.as_str(), reason)
            }
        }
    }
}

/// Drives one of the five task protocols per instruction.
pub struct Orchestrator<C, G, D, K = TokioClock> {
    classifier: C,
    generator: G,
    device: D,
    history: Arc<HistoryStore>,
    memory: Arc<ForeverMemory>,
    attributor: Attributor,
    loop_config: LoopConfig,
    clock: K,
}

impl<C, G, D> Orchestrator<C, G, D, TokioClock>
where
    C: Classifier,
    G: ReplyGenerator,
    D: DeviceOperator,
{
    pub fn new(
        classifier: C,
        generator: G,
        device: D,
        history: Arc<HistoryStore>,
        memory: Arc<ForeverMemory>,
    ) -> Self {
        Self {
            classifier,
            generator,
            device,
            history,
            memory,
            attributor: Attributor::new(),
            loop_config: LoopConfig::default(),
            clock: TokioClock,
        }
    }
}

impl<C, G, D, K> Orchestrator<C, G, D, K>
where
    C: Classifier,
    G: ReplyGenerator,
    D: DeviceOperator,
    K: Clock,
{
    /// Override the loop parameters.
    pub fn with_loop_config(mut self, config: LoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    /// Override the attribution/dedup policy.
    pub fn with_attributor(mut self, attributor: Attributor) -> Self {
        self.attributor = attributor;
        self
    }

    /// Swap the timer implementation (tests use an instant clock).
    pub fn with_clock<K2: Clock>(self, clock: K2) -> Orchestrator<C, G, D, K2> {
        Orchestrator {
            classifier: self.classifier,
            generator: self.generator,
            device: self.device,
            history: self.history,
            memory: self.memory,
            attributor: self.attributor,
            loop_config: self.loop_config,
            clock,
        }
    }

    /// Classify and execute one instruction to its terminal state. Never
    /// panics the orchestrating process; every failure lands in the report.
    pub async fn run_instruction(&self, text: &str) -> InstructionReport {
        self.run_instruction_with_cancel(text, CancelToken::new())
            .await
    }

    /// Like [`run_instruction`](Self::run_instruction), with an externally
    /// held cancellation token. Each instruction gets its own token;
    /// cancelling one never affects another.
    pub async fn run_instruction_with_cancel(
        &self,
        text: &str,
        cancel: CancelToken,
    ) -> InstructionReport {
        let instruction = Instruction::new(text);

        let classification = match self.classifier.classify(&instruction, None).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(instruction = %instruction.id, error = %e, "classifier errored, degrading to free_chat");
                Classification::degraded_free_chat()
            }
        };

        tracing::info!(
            instruction = %instruction.id,
            task_type = classification.task_type.as_str(),
            app = %classification.target_app,
            target = %classification.target_object,
            degraded = classification.degraded,
            "instruction classified"
        );

        let (status, reply_text) = match classification.task_type {
            TaskType::FreeChat => self.exec_free_chat(&instruction).await,
            TaskType::BasicOperation => self.exec_basic(&classification).await,
            TaskType::SingleReply => self.exec_single(&classification).await,
            TaskType::ContinuousReply => self.exec_continuous(&classification, &cancel).await,
            TaskType::ComplexOperation => self.exec_complex(&instruction).await,
        };

        if let TaskStatus::Failed(reason) = &status {
            tracing::error!(
                instruction = %instruction.id,
                task_type = classification.task_type.as_str(),
                app = %classification.target_app,
                target = %classification.target_object,
                %reason,
                "instruction failed"
            );
        }

        InstructionReport {
            instruction_id: instruction.id,
            task_type: classification.task_type,
            status,
            reply_text,
            degraded: classification.degraded,
        }
    }

    /// Run one instruction on its own worker task. Returns the instruction's
    /// own cancellation token alongside the join handle; the token is minted
    /// fresh per call so a stale cancellation can never leak into a later
    /// instruction.
    pub fn spawn_instruction(
        self: &Arc<Self>,
        text: impl Into<String>,
    ) -> (CancelToken, tokio::task::JoinHandle<InstructionReport>)
    where
        C: 'static,
        G: 'static,
        D: 'static,
        K: 'static,
    {
        let this = Arc::clone(self);
        let text = text.into();
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { this.run_instruction_with_cancel(&text, task_cancel).await });
        (cancel, handle)
    }

    /// Free chat: one generation call over free-chat history; terminal
    /// regardless of outcome.
    async fn exec_free_chat(&self, instruction: &Instruction) -> (TaskStatus, Option<String>) {
        let request = ReplyRequest {
            new_messages: vec![Message {
                text: instruction.text.clone(),
                sender: Sender::Theirs,
                extracted_at: Utc::now(),
            }],
            session_history: Vec::new(),
            free_chat_history: self.history.recent_free_chats(RECENT_FREE_CHAT_LIMIT),
            forever_memory: self.memory.get().to_string(),
        };

        match self.generator.generate(&request).await {
            Ok(reply) => {
                self.history.append(SessionRecord::free_chat(format!(
                    "用户: {}\n助手: {}",
                    instruction.text, reply
                )));
                (TaskStatus::Completed, Some(reply))
            }
            Err(e) => (TaskStatus::Failed(format!("生成回复失败: {}", e)), None),
        }
    }

    /// Basic operation: one open-app call, no retry.
    async fn exec_basic(&self, classification: &Classification) -> (TaskStatus, Option<String>) {
        match self.device.open_app(&classification.target_app).await {
            Ok(()) => (TaskStatus::Completed, None),
            Err(e) => (
                TaskStatus::Failed(format!("打开 {} 失败: {}", classification.target_app, e)),
                None,
            ),
        }
    }

    /// Single reply: one extract -> attribute -> generate -> send round.
    async fn exec_single(&self, classification: &Classification) -> (TaskStatus, Option<String>) {
        let app = &classification.target_app;
        let target = &classification.target_object;

        let extraction = self.poll_round(app, target, &[]).await;
        if !extraction.success {
            return (
                TaskStatus::Failed(extraction_failure(extraction.attempts_used)),
                None,
            );
        }

        if !has_actionable(&extraction.messages) {
            tracing::info!(%app, %target, "no messages to answer");
            return (TaskStatus::Completed, None);
        }

        match self.reply_and_send(app, target, extraction.messages, 0).await {
            Ok(reply) => (TaskStatus::Completed, Some(reply)),
            Err(reason) => (TaskStatus::Failed(reason), None),
        }
    }

    /// Complex operation: forward the raw instruction verbatim and treat the
    /// agent's single response as terminal.
    async fn exec_complex(&self, instruction: &Instruction) -> (TaskStatus, Option<String>) {
        match self.device.run_complex_instruction(&instruction.text).await {
            Ok(result) => {
                let reply = if result.is_empty() { None } else { Some(result) };
                (TaskStatus::Completed, reply)
            }
            Err(e) => (TaskStatus::Failed(format!("复杂操作执行失败: {}", e)), None),
        }
    }

    /// Continuous reply: poll, answer the delta, repeat until the cycle cap,
    /// cancellation, a quiet conversation or an unrecoverable failure.
    async fn exec_continuous(
        &self,
        classification: &Classification,
        cancel: &CancelToken,
    ) -> (TaskStatus, Option<String>) {
        let app = &classification.target_app;
        let target = &classification.target_object;
        let mut state = CycleState::new();
        let mut idle_rounds = 0u32;
        let mut last_reply: Option<String> = None;

        let end = loop {
            // Cancellation is observed only here, never mid-call.
            if cancel.is_cancelled() {
                break LoopEnd::Cancelled;
            }
            if state.cycle_count >= self.loop_config.max_cycle_times {
                break LoopEnd::CycleCapReached;
            }

            let extraction = self.poll_round(app, target, &state.last_seen).await;
            if !extraction.success {
                state.consecutive_extraction_failures = extraction.attempts_used;
                break LoopEnd::Failed(format!(
                    "第{}轮: {}",
                    state.cycle_count + 1,
                    extraction_failure(extraction.attempts_used)
                ));
            }
            state.consecutive_extraction_failures = extraction.attempts_used - 1;

            // Everything new enters the dedup window, even our own bubbles.
            state.last_seen.extend(extraction.messages.iter().cloned());

            if !has_actionable(&extraction.messages) {
                idle_rounds += 1;
                if idle_rounds >= self.loop_config.max_idle_rounds {
                    break LoopEnd::WentQuiet;
                }
                self.clock.sleep(self.loop_config.wait_interval).await;
                continue;
            }
            idle_rounds = 0;

            match self
                .reply_and_send(app, target, extraction.messages, state.cycle_count + 1)
                .await
            {
                Ok(reply) => {
                    state.cycle_count += 1;
                    tracing::info!(%app, %target, cycle = state.cycle_count, "reply sent");
                    last_reply = Some(reply);
                }
                Err(reason) => break LoopEnd::Failed(reason),
            }

            if state.cycle_count >= self.loop_config.max_cycle_times {
                break LoopEnd::CycleCapReached;
            }
            self.clock.sleep(self.loop_config.wait_interval).await;
        };

        tracing::info!(
            %app,
            %target,
            cycles = state.cycle_count,
            extraction_failures = state.consecutive_extraction_failures,
            end = ?end,
            "continuous loop finished"
        );

        match end {
            LoopEnd::Failed(reason) => (TaskStatus::Failed(reason), last_reply),
            _ => (TaskStatus::Completed, last_reply),
        }
    }

    /// One polling round: pull the transcript, attribute the bubbles and
    /// keep only messages not already seen. A round whose retry budget ran
    /// out comes back with `success == false` and no messages.
    async fn poll_round(&self, app: &str, target: &str, last_seen: &[Message]) -> ExtractionResult {
        match self.extract_bubbles(app, target).await {
            Some((bubbles, attempts_used)) => ExtractionResult {
                success: true,
                messages: self.attributor.resolve_new(&bubbles, last_seen),
                attempts_used,
            },
            None => ExtractionResult {
                success: false,
                messages: Vec::new(),
                attempts_used: self.loop_config.max_retry_times.max(1),
            },
        }
    }

    /// Extract and parse the transcript with the configured retry budget.
    /// Blank or unparsable transcripts count as failed attempts. `None`
    /// means the budget is exhausted.
    async fn extract_bubbles(&self, app: &str, target: &str) -> Option<(Vec<Bubble>, u32)> {
        let budget = self.loop_config.max_retry_times.max(1);

        for attempt in 1..=budget {
            match self.device.extract_transcript(app, target).await {
                Ok(raw) => {
                    let bubbles = parse_transcript(&raw, attempt);
                    if !bubbles.is_empty() {
                        return Some((bubbles, attempt));
                    }
                    tracing::warn!(app, target, attempt, "blank or malformed transcript");
                }
                Err(e) => {
                    tracing::warn!(app, target, attempt, error = %e, "extraction failed");
                }
            }
            if attempt < budget {
                self.clock.sleep(self.loop_config.wait_interval).await;
            }
        }

        None
    }

    /// Generate a reply for the delta, send it, and persist the session
    /// record. Send failures abort immediately with no retry.
    async fn reply_and_send(
        &self,
        app: &str,
        target: &str,
        new_messages: Vec<Message>,
        cycle: u32,
    ) -> Result<String, String> {
        let received: Vec<String> = new_messages.iter().map(|m| m.text.clone()).collect();

        let request = ReplyRequest {
            new_messages,
            session_history: self.history.recent_sessions(app, target, RECENT_SESSION_LIMIT),
            free_chat_history: self.history.recent_free_chats(RECENT_FREE_CHAT_LIMIT),
            forever_memory: self.memory.get().to_string(),
        };

        let reply = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| format!("第{}轮生成回复失败: {}", cycle.max(1), e))?;

        self.device
            .send_message(app, target, &reply)
            .await
            .map_err(|e| format!("第{}轮发送失败: {}", cycle.max(1), e))?;

        self.history.append(SessionRecord::chat_session(
            app,
            target,
            format!("收到: {} | 回复: {}", received.join(" / "), reply),
        ));

        Ok(reply)
    }
}

/// A round is only worth answering when the delta contains a message that
/// is not our own.
fn has_actionable(messages: &[Message]) -> bool {
    messages.iter().any(|m| m.sender != Sender::Mine)
}

fn extraction_failure(attempts: u32) -> String {
    format!("提取聊天记录失败（已重试{}次）", attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ClassifyError, RuleClassifier};
    use crate::reply::ReplyError;
    use std::collections::VecDeque;
    use std::env;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Classifier with a fixed answer.
    struct FixedClassifier(Classification);

    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            _instruction: &Instruction,
            _context: Option<&str>,
        ) -> Result<Classification, ClassifyError> {
            Ok(self.0.clone())
        }
    }

    /// Classifier that always errors, to exercise the degraded fallback.
    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        async fn classify(
            &self,
            _instruction: &Instruction,
            _context: Option<&str>,
        ) -> Result<Classification, ClassifyError> {
            Err(ClassifyError::Payload("boom".to_string()))
        }
    }

    #[derive(Default)]
    struct MockGenerator {
        calls: AtomicU32,
        fail: AtomicBool,
        last_request_messages: Mutex<Vec<String>>,
    }

    impl ReplyGenerator for MockGenerator {
        async fn generate(&self, request: &ReplyRequest) -> Result<String, ReplyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request_messages.lock().unwrap() =
                request.new_messages.iter().map(|m| m.text.clone()).collect();
            if self.fail.load(Ordering::SeqCst) {
                return Err(ReplyError::EmptyInput);
            }
            Ok(format!("回复{}", self.calls.load(Ordering::SeqCst)))
        }
    }

    #[derive(Default)]
    struct MockDevice {
        transcripts: Mutex<VecDeque<Result<String, String>>>,
        fallback_transcript: Mutex<Option<String>>,
        sent: Mutex<Vec<String>>,
        fail_send: AtomicBool,
        open_calls: AtomicU32,
        fail_open: AtomicBool,
        complex_calls: Mutex<Vec<String>>,
        extract_calls: AtomicU32,
    }

    impl MockDevice {
        fn script(&self, outcomes: Vec<Result<&str, &str>>) {
            *self.transcripts.lock().unwrap() = outcomes
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
        }

        fn set_fallback(&self, transcript: &str) {
            *self.fallback_transcript.lock().unwrap() = Some(transcript.to_string());
        }
    }

    impl DeviceOperator for MockDevice {
        async fn open_app(&self, _app: &str) -> Result<(), crate::device::DeviceError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(crate::device::DeviceError::Rejected("no such app".to_string()));
            }
            Ok(())
        }

        async fn extract_transcript(
            &self,
            _app: &str,
            _target: &str,
        ) -> Result<String, crate::device::DeviceError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.transcripts.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(raw)) => Ok(raw),
                Some(Err(e)) => Err(crate::device::DeviceError::Rejected(e)),
                None => match self.fallback_transcript.lock().unwrap().clone() {
                    Some(raw) => Ok(raw),
                    None => Err(crate::device::DeviceError::Rejected(
                        "no transcript scripted".to_string(),
                    )),
                },
            }
        }

        async fn send_message(
            &self,
            _app: &str,
            _target: &str,
            text: &str,
        ) -> Result<(), crate::device::DeviceError> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(crate::device::DeviceError::Rejected("send blocked".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn run_complex_instruction(
            &self,
            raw_instruction: &str,
        ) -> Result<String, crate::device::DeviceError> {
            self.complex_calls.lock().unwrap().push(raw_instruction.to_string());
            Ok("已完成".to_string())
        }
    }

    /// Clock that returns immediately and counts sleeps.
    #[derive(Default)]
    struct InstantClock {
        sleeps: AtomicU32,
    }

    impl Clock for InstantClock {
        async fn sleep(&self, _duration: Duration) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Clock whose sleeps park until the test releases them, so a test can
    /// act while the loop is waiting between cycles.
    #[derive(Default)]
    struct GateClock {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl Clock for GateClock {
        async fn sleep(&self, _duration: Duration) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    fn test_history() -> Arc<HistoryStore> {
        let path = env::temp_dir().join(format!("chat_copilot_orch_{}.json", Uuid::new_v4()));
        Arc::new(HistoryStore::open(path))
    }

    fn test_memory() -> Arc<ForeverMemory> {
        Arc::new(ForeverMemory::new(
            env::temp_dir().join(format!("no_memory_{}.txt", Uuid::new_v4())),
        ))
    }

    fn orchestrator<C: Classifier>(
        classifier: C,
        device: MockDevice,
        config: LoopConfig,
    ) -> Orchestrator<C, MockGenerator, MockDevice, InstantClock> {
        Orchestrator::new(
            classifier,
            MockGenerator::default(),
            device,
            test_history(),
            test_memory(),
        )
        .with_loop_config(config)
        .with_clock(InstantClock::default())
    }

    fn continuous_classification() -> Classification {
        Classification {
            task_type: TaskType::ContinuousReply,
            target_app: "微信".to_string(),
            target_object: "张三".to_string(),
            is_auto: true,
            specific_content: String::new(),
            degraded: false,
        }
    }

    #[tokio::test]
    async fn test_single_reply_round() {
        let device = MockDevice::default();
        device.script(vec![Ok("[left] 在吗？")]);

        let orch = orchestrator(RuleClassifier::new(), device, LoopConfig::default());
        let report = orch.run_instruction("打开QQ给黄恬发消息").await;

        assert_eq!(report.task_type, TaskType::SingleReply);
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.reply_text.as_deref(), Some("回复1"));
        assert_eq!(orch.device.sent.lock().unwrap().len(), 1);
        assert_eq!(orch.history.len(), (1, 0));
    }

    #[tokio::test]
    async fn test_extraction_retry_then_success() {
        let device = MockDevice::default();
        device.script(vec![Err("screen busy"), Err("screen busy"), Ok("[left] 在吗？")]);

        let classification = Classification {
            task_type: TaskType::SingleReply,
            target_app: "QQ".to_string(),
            target_object: "黄恬".to_string(),
            ..Classification::free_chat()
        };
        let orch = orchestrator(
            FixedClassifier(classification),
            device,
            LoopConfig::default().with_max_retries(3),
        );
        let report = orch.run_instruction("打开QQ给黄恬发消息").await;

        // Attempt 3 succeeded within the budget, so the round proceeds.
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.device.extract_calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.device.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extraction_budget_exhausted_fails() {
        let device = MockDevice::default();
        device.script(vec![Err("a"), Err("b"), Err("c")]);

        let classification = Classification {
            task_type: TaskType::SingleReply,
            target_app: "QQ".to_string(),
            target_object: "黄恬".to_string(),
            ..Classification::free_chat()
        };
        let orch = orchestrator(
            FixedClassifier(classification),
            device,
            LoopConfig::default().with_max_retries(3),
        );
        let report = orch.run_instruction("打开QQ给黄恬发消息").await;

        match report.status {
            TaskStatus::Failed(reason) => assert!(reason.contains("已重试3次")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(orch.device.sent.lock().unwrap().is_empty());
        assert_eq!(orch.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poll_round_reports_attempts() {
        let device = MockDevice::default();
        device.script(vec![Err("screen busy"), Ok("[left] 在吗？")]);

        let orch = orchestrator(
            FixedClassifier(continuous_classification()),
            device,
            LoopConfig::default().with_max_retries(3),
        );

        let round = orch.poll_round("微信", "张三", &[]).await;
        assert!(round.success);
        assert_eq!(round.attempts_used, 2);
        assert_eq!(round.messages.len(), 1);

        orch.device.script(vec![Err("a"), Err("b"), Err("c")]);
        let round = orch.poll_round("微信", "张三", &[]).await;
        assert!(!round.success);
        assert_eq!(round.attempts_used, 3);
        assert!(round.messages.is_empty());
    }

    #[tokio::test]
    async fn test_continuous_runs_to_cycle_cap() {
        let device = MockDevice::default();
        device.script(vec![
            Ok("对方: 第一条消息来了"),
            Ok("对方: 第一条消息来了\n对方: 第二条消息也来了"),
        ]);

        let orch = orchestrator(
            FixedClassifier(continuous_classification()),
            device,
            LoopConfig::default().with_max_cycles(2).with_max_idle_rounds(3),
        );
        let report = orch.run_instruction("打开微信给张三发消息auto").await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.device.sent.lock().unwrap().len(), 2);
        assert_eq!(orch.generator.calls.load(Ordering::SeqCst), 2);
        // Round two generated only from the delta.
        assert_eq!(
            *orch.generator.last_request_messages.lock().unwrap(),
            vec!["第二条消息也来了".to_string()]
        );
    }

    #[tokio::test]
    async fn test_continuous_duplicate_round_sends_nothing() {
        let device = MockDevice::default();
        device.script(vec![Ok("对方: 在吗？")]);
        device.set_fallback("对方: 在吗？");

        let orch = orchestrator(
            FixedClassifier(continuous_classification()),
            device,
            LoopConfig::default().with_max_cycles(5).with_max_idle_rounds(2),
        );
        let report = orch.run_instruction("打开微信给张三发消息auto").await;

        // One reply for the first round; the re-extracted transcript is all
        // duplicates, so the loop idles out without another generation.
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.device.sent.lock().unwrap().len(), 1);
        assert_eq!(orch.generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_continuous_cancellation_at_boundary() {
        let device = MockDevice::default();
        device.set_fallback("对方: 在吗？");

        let orch = orchestrator(
            FixedClassifier(continuous_classification()),
            device,
            LoopConfig::default(),
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = orch
            .run_instruction_with_cancel("打开微信给张三发消息auto", cancel)
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.device.extract_calls.load(Ordering::SeqCst), 0);
        assert!(orch.device.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_wait_stops_at_next_boundary() {
        // Park the loop inside its first between-cycle sleep, cancel there,
        // then release the sleep: the loop must stop at the next boundary
        // instead of running on to the cycle cap.
        let device = MockDevice::default();
        device.script(vec![
            Ok("对方: 第一句"),
            Ok("对方: 第一句\n对方: 第二句"),
            Ok("对方: 第一句\n对方: 第二句\n对方: 第三句"),
        ]);

        let orch = Arc::new(
            Orchestrator::new(
                FixedClassifier(continuous_classification()),
                MockGenerator::default(),
                device,
                test_history(),
                test_memory(),
            )
            .with_loop_config(LoopConfig::default().with_max_cycles(3).with_max_idle_rounds(3))
            .with_clock(GateClock::default()),
        );

        let (cancel, handle) = orch.spawn_instruction("打开微信给张三发消息auto");

        orch.clock.entered.notified().await;
        cancel.cancel();
        orch.clock.release.notify_one();

        let report = handle.await.unwrap();
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.device.sent.lock().unwrap().len(), 1);
        assert_eq!(orch.device.extract_calls.load(Ordering::SeqCst), 1);

        // The token came minted fresh for this instruction; a later spawn
        // gets its own, still-uncancelled one.
        let (next_cancel, next_handle) = orch.spawn_instruction("打开微信给张三发消息auto");
        assert!(!next_cancel.is_cancelled());
        next_cancel.cancel();
        let report = next_handle.await.unwrap();
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.device.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_continuous_send_failure_aborts() {
        let device = MockDevice::default();
        device.script(vec![Ok("对方: 在吗？")]);
        device.fail_send.store(true, Ordering::SeqCst);

        let orch = orchestrator(
            FixedClassifier(continuous_classification()),
            device,
            LoopConfig::default(),
        );
        let report = orch.run_instruction("打开微信给张三发消息auto").await;

        assert!(matches!(report.status, TaskStatus::Failed(_)));
        // No automatic retry after a rejected send.
        assert_eq!(orch.generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_basic_operation_failure_no_retry() {
        let device = MockDevice::default();
        device.fail_open.store(true, Ordering::SeqCst);

        let orch = orchestrator(RuleClassifier::new(), device, LoopConfig::default());
        let report = orch.run_instruction("打开微信").await;

        assert_eq!(report.task_type, TaskType::BasicOperation);
        assert!(matches!(report.status, TaskStatus::Failed(_)));
        assert_eq!(orch.device.open_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complex_forwards_instruction_verbatim() {
        let device = MockDevice::default();
        let orch = orchestrator(RuleClassifier::new(), device, LoopConfig::default());
        let report = orch.run_instruction("打开抖音点赞").await;

        assert_eq!(report.task_type, TaskType::ComplexOperation);
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(
            *orch.device.complex_calls.lock().unwrap(),
            vec!["打开抖音点赞".to_string()]
        );
    }

    #[tokio::test]
    async fn test_free_chat_appends_history() {
        let device = MockDevice::default();
        let orch = orchestrator(RuleClassifier::new(), device, LoopConfig::default());
        let report = orch.run_instruction("你好呀").await;

        assert_eq!(report.task_type, TaskType::FreeChat);
        assert_eq!(report.status, TaskStatus::Completed);
        assert!(report.reply_text.is_some());
        assert_eq!(orch.history.len(), (0, 1));
    }

    #[tokio::test]
    async fn test_broken_classifier_degrades_to_free_chat() {
        let device = MockDevice::default();
        let orch = orchestrator(BrokenClassifier, device, LoopConfig::default());
        let report = orch.run_instruction("打开抖音点赞").await;

        assert_eq!(report.task_type, TaskType::FreeChat);
        assert!(report.degraded);
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(orch.generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_line_shapes() {
        let device = MockDevice::default();
        device.script(vec![Ok("[left] 在吗？")]);
        let orch = orchestrator(RuleClassifier::new(), device, LoopConfig::default());
        let report = orch.run_instruction("打开QQ给黄恬发消息").await;
        assert_eq!(report.status_line(), "[single_reply] 完成");
    }
}
