//! Chat Copilot - instruction classification and chat-reply orchestration
//!
//! This is the main entry point for the chat-copilot CLI tool.

use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use chat_copilot::{
    AppSettings, Classifier, DeviceConfig, ForeverMemory, HistoryStore, LoopConfig,
    ModelClassifier, ModelConfig, ModelReplyGenerator, Orchestrator, RemoteDevice, RuleClassifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = AppSettings::load();

    // Environment overrides take priority over the persisted settings file
    let decision_config = ModelConfig::default()
        .with_base_url(env_or("DECISION_BASE_URL", &settings.decision_base_url))
        .with_api_key(env_or("DECISION_API_KEY", &settings.decision_api_key))
        .with_model_name(env_or("DECISION_MODEL", &settings.decision_model))
        .with_max_retries(settings.max_retries)
        .with_retry_delay(settings.retry_delay);

    let reply_config = ModelConfig::default()
        .with_base_url(env_or("REPLY_BASE_URL", &settings.reply_base_url))
        .with_api_key(env_or("REPLY_API_KEY", &settings.reply_api_key))
        .with_model_name(env_or("REPLY_MODEL", &settings.reply_model))
        .with_max_retries(settings.max_retries)
        .with_retry_delay(settings.retry_delay);

    let device_config = DeviceConfig::default()
        .with_base_url(env_or("DEVICE_AGENT_URL", &settings.device_base_url))
        .with_api_key(env_or("DEVICE_AGENT_API_KEY", &settings.device_api_key));

    let loop_config = LoopConfig::default()
        .with_max_cycles(settings.max_cycle_times)
        .with_wait_interval(Duration::from_secs(settings.wait_interval_secs))
        .with_max_retries(settings.max_retry_times)
        .with_max_idle_rounds(settings.max_idle_rounds);

    let history = Arc::new(HistoryStore::open(env_or("HISTORY_PATH", &settings.history_path)));
    let memory = Arc::new(ForeverMemory::new(env_or(
        "FOREVER_MEMORY_PATH",
        &settings.forever_memory_path,
    )));

    let use_rule_classifier = settings.rule_classifier
        || env::var("RULE_CLASSIFIER")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

    if use_rule_classifier {
        tracing::info!("using offline keyword-rule classifier");
        let orchestrator = Arc::new(
            Orchestrator::new(
                RuleClassifier::new(),
                ModelReplyGenerator::new(reply_config),
                RemoteDevice::new(device_config),
                history,
                memory,
            )
            .with_loop_config(loop_config),
        );
        run_repl(orchestrator).await
    } else {
        let orchestrator = Arc::new(
            Orchestrator::new(
                ModelClassifier::new(decision_config),
                ModelReplyGenerator::new(reply_config),
                RemoteDevice::new(device_config),
                history,
                memory,
            )
            .with_loop_config(loop_config),
        );
        run_repl(orchestrator).await
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Interactive instruction loop. Each instruction runs on its own worker
/// task; Ctrl-C cancels a running continuous-reply loop at its next cycle
/// boundary.
async fn run_repl<C>(
    orchestrator: Arc<Orchestrator<C, ModelReplyGenerator, RemoteDevice>>,
) -> anyhow::Result<()>
where
    C: Classifier + 'static,
{
    println!("chat-copilot 已就绪。输入指令（exit 退出）：");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            print!("> ");
            io::stdout().flush()?;
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        let (cancel, handle) = orchestrator.spawn_instruction(text);

        let report = tokio::select! {
            joined = handle => joined?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n正在取消，等待当前轮结束…");
                cancel.cancel();
                // The loop observes the flag at its next cycle boundary.
                print!("> ");
                io::stdout().flush()?;
                continue;
            }
        };

        if let Some(reply) = &report.reply_text {
            println!("{}", reply);
        }
        println!("{}", report.status_line());
        print!("> ");
        io::stdout().flush()?;
    }

    Ok(())
}
