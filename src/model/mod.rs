//! Shared chat-completion client for the AI services.

mod client;

pub use client::{
    strip_code_fence, MessageBuilder, ModelClient, ModelConfig, ModelError,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS,
};
