//! HTTP client for the device-operating agent.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{DeviceError, DeviceOperator};

/// Configuration for the device-agent endpoint.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub base_url: String,
    pub api_key: String,
    /// Complex instructions can drive many screen steps; give them room.
    pub timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: "EMPTY".to_string(),
            timeout_secs: 300,
        }
    }
}

impl DeviceConfig {
    /// Set the device-agent base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the per-request timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Device-operating agent reached over HTTP.
pub struct RemoteDevice {
    config: DeviceConfig,
    client: Client,
}

impl RemoteDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    async fn call(&self, endpoint: &str, body: Value) -> Result<AgentResponse, DeviceError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeviceError::Rejected(text));
        }

        let parsed: AgentResponse = response
            .json()
            .await
            .map_err(|e| DeviceError::Parse(e.to_string()))?;

        if !parsed.success {
            return Err(DeviceError::Rejected(
                parsed.error.unwrap_or_else(|| "unknown agent error".to_string()),
            ));
        }

        Ok(parsed)
    }
}

impl DeviceOperator for RemoteDevice {
    async fn open_app(&self, app: &str) -> Result<(), DeviceError> {
        self.call("open_app", json!({ "app": app })).await?;
        Ok(())
    }

    async fn extract_transcript(&self, app: &str, target: &str) -> Result<String, DeviceError> {
        let response = self
            .call("extract_transcript", json!({ "app": app, "target": target }))
            .await?;
        response
            .result
            .ok_or_else(|| DeviceError::Parse("missing transcript in agent response".to_string()))
    }

    async fn send_message(&self, app: &str, target: &str, text: &str) -> Result<(), DeviceError> {
        self.call(
            "send_message",
            json!({ "app": app, "target": target, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn run_complex_instruction(&self, raw_instruction: &str) -> Result<String, DeviceError> {
        let response = self
            .call("run_instruction", json!({ "instruction": raw_instruction }))
            .await?;
        Ok(response.result.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_builder() {
        let config = DeviceConfig::default()
            .with_base_url("http://10.0.0.5:9000/")
            .with_api_key("secret")
            .with_timeout(60);
        assert_eq!(config.base_url, "http://10.0.0.5:9000/");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_agent_response_shapes() {
        let ok: AgentResponse =
            serde_json::from_str(r#"{"success":true,"result":"[left] 在吗"}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.result.as_deref(), Some("[left] 在吗"));

        let err: AgentResponse =
            serde_json::from_str(r#"{"success":false,"error":"no such contact"}"#).unwrap();
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("no such contact"));
    }
}
