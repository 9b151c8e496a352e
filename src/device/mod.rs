//! Device operation adapter.
//!
//! The device-operating agent is an external collaborator: it owns the
//! screen, the gestures and the session to the device. This crate only
//! talks to it through four opaque capabilities.

mod remote;

pub use remote::{DeviceConfig, RemoteDevice};

use std::future::Future;
use thiserror::Error;

/// Device-operating agent errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device agent request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("device agent rejected the operation: {0}")]
    Rejected(String),
    #[error("unparsable device agent response: {0}")]
    Parse(String),
}

/// The four capabilities of the device-operating agent.
pub trait DeviceOperator: Send + Sync {
    /// Bring the app to the foreground.
    fn open_app(&self, app: &str) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Read the current chat transcript for (app, target) as raw text.
    fn extract_transcript(
        &self,
        app: &str,
        target: &str,
    ) -> impl Future<Output = Result<String, DeviceError>> + Send;

    /// Type and dispatch a message in the (app, target) conversation.
    fn send_message(
        &self,
        app: &str,
        target: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Hand a multi-step instruction to the agent verbatim and wait for its
    /// single opaque result.
    fn run_complex_instruction(
        &self,
        raw_instruction: &str,
    ) -> impl Future<Output = Result<String, DeviceError>> + Send;
}
