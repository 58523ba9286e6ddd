use crate::report::{BatchResult, Overall};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification settings sourced from the environment (a `.env` file is
/// honored via dotenvy at startup). Channel and token are both required for
/// delivery; the node name only labels the message.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyConfig {
    pub channel: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub node_name: String,
}

impl NotifyConfig {
    /// `None` disables notification entirely.
    pub fn from_env() -> Option<Self> {
        let channel = std::env::var("SLACK_BOT_CHANNEL").ok()?;
        let token = std::env::var("SLACK_BOT_TOKEN").ok()?;
        if channel.is_empty() || token.is_empty() {
            return None;
        }
        let node_name = std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string());
        Some(Self {
            channel,
            token,
            node_name,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Skipped,
    Failed,
}

/// Delivery boundary, stubbed in tests.
pub trait AlertSink {
    fn post(&self, cfg: &NotifyConfig, text: &str) -> Result<()>;
}

/// Posts to Slack `chat.postMessage` with a bearer token.
pub struct SlackSink;

impl AlertSink for SlackSink {
    fn post(&self, cfg: &NotifyConfig, text: &str) -> Result<()> {
        let payload = json!({
            "channel": cfg.channel,
            "attachments": [
                {
                    "color": "#FF0000",
                    "text": text,
                },
            ],
        });

        let client = reqwest::blocking::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .with_context(|| "building http client")?;
        let res = client
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(&cfg.token)
            .json(&payload)
            .send()
            .with_context(|| "posting slack message")?;

        let body: serde_json::Value = res.json().with_context(|| "parsing slack response")?;
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(anyhow!(
                "slack rejected the message: {}",
                body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown")
            ));
        }
        Ok(())
    }
}

/// Deliver at most one alert per batch, and only for failures. Delivery
/// problems are logged here and surface only as `Failed`; they never alter
/// the batch's own exit status.
pub fn notify(result: &BatchResult, cfg: Option<&NotifyConfig>, sink: &dyn AlertSink) -> NotifyOutcome {
    let Some(cfg) = cfg else {
        info!("notification channel not configured; skipping");
        return NotifyOutcome::Skipped;
    };

    if result.overall == Overall::AllSucceeded {
        return NotifyOutcome::Skipped;
    }

    let text = compose_failure_message(result, &cfg.node_name);
    alert(Some(cfg), &text, sink)
}

/// Deliver one pre-composed alert. Used for failures outside the batch itself
/// (e.g. the image refresh) as well as by [`notify`].
pub fn alert(cfg: Option<&NotifyConfig>, text: &str, sink: &dyn AlertSink) -> NotifyOutcome {
    let Some(cfg) = cfg else {
        return NotifyOutcome::Skipped;
    };
    match sink.post(cfg, text) {
        Ok(()) => {
            info!("alert delivered to {}", cfg.channel);
            NotifyOutcome::Sent
        }
        Err(err) => {
            warn!("alert could not be delivered: {err:#}");
            NotifyOutcome::Failed
        }
    }
}

/// Message body listing each failed app id with its exit code.
pub fn compose_failure_message(result: &BatchResult, node_name: &str) -> String {
    let mut text = String::from("*Failed Steam Game Caching*\n*Details:*\n");
    text.push_str(&format!("• *Node Name:* `{node_name}`\n"));
    for o in result.failed() {
        text.push_str(&format!(
            "• *Steam App ID:* `{}` (exit `{}`)\n",
            o.job.app_id, o.exit_code
        ));
    }
    text.push_str(&format!("• *Overall:* `{:?}`", result.overall));
    text
}
