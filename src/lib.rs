//! # Chat Copilot
//!
//! AI-powered copilot that turns a single natural-language instruction into
//! one of five executable behaviors against a remotely-controlled device
//! session: free chat, opening an app, a single chat reply, a continuous
//! auto-reply loop, or an opaque multi-step operation.
//!
//! Two cooperating AI roles sit behind adapters: a classification service
//! decides what kind of action an instruction requires, and a
//! device-operating agent carries out screen-level work (read the current
//! transcript, send text, open apps). The orchestrator in this crate wires
//! them together with bounded retries, cross-round message de-duplication
//! and durable conversation history.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chat_copilot::{
//!     DeviceConfig, ForeverMemory, HistoryStore, ModelClassifier, ModelConfig,
//!     ModelReplyGenerator, Orchestrator, RemoteDevice,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(
//!         ModelClassifier::new(ModelConfig::default()),
//!         ModelReplyGenerator::new(ModelConfig::default()),
//!         RemoteDevice::new(DeviceConfig::default()),
//!         Arc::new(HistoryStore::open("chat_history.json")),
//!         Arc::new(ForeverMemory::new("forever_memory.txt")),
//!     );
//!
//!     let report = orchestrator.run_instruction("打开QQ给黄恬发消息").await;
//!     println!("{}", report.status_line());
//!     Ok(())
//! }
//! ```

pub mod decision;
pub mod device;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod reply;
pub mod settings;
pub mod transcript;

pub use decision::{
    Classification, Classifier, ClassifyError, Instruction, ModelClassifier, RuleClassifier,
    TaskType,
};
pub use device::{DeviceConfig, DeviceError, DeviceOperator, RemoteDevice};
pub use history::{ForeverMemory, HistoryStore, RecordKind, SessionRecord, MAX_HISTORY_LENGTH};
pub use model::{ModelClient, ModelConfig, ModelError};
pub use orchestrator::{
    CancelToken, Clock, CycleState, InstructionReport, LoopConfig, LoopEnd, Orchestrator,
    TaskStatus, TokioClock,
};
pub use reply::{ModelReplyGenerator, ReplyError, ReplyGenerator, ReplyRequest};
pub use settings::AppSettings;
pub use transcript::{
    parse_transcript, Attributor, AvatarSide, Bubble, ExtractionResult, Message, Sender,
};
