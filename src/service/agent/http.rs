//! HTTP client for a hosted analytics agent that answers over server-sent events.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::base::{
    config::Config,
    types::{Directive, Question, Res},
};

use super::{AgentClient, GenericAgentClient, render_prompt};

// Extra methods on `AgentClient` applied by the http implementation.

impl AgentClient {
    pub fn http(config: &Config) -> Res<Self> {
        let client = HttpAgentClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Specific implementations.

/// Hosted agent reached over HTTP with a bearer token.
#[derive(Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpAgentClient {
    #[instrument(name = "HttpAgentClient::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let endpoint = config.agent_endpoint.clone().ok_or_else(|| anyhow!("No agent endpoint configured."))?;
        let token = config.agent_token.clone().ok_or_else(|| anyhow!("No agent token configured."))?;

        let client = reqwest::Client::builder().timeout(config.agent_timeout()).build()?;

        info!("Hosted agent endpoint: {}", endpoint);

        Ok(Self { client, endpoint, token })
    }
}

#[async_trait]
impl GenericAgentClient for HttpAgentClient {
    #[instrument(skip_all, fields(question_id = question.id()))]
    async fn ask(&self, question: &Question, directive: &Directive) -> Res<String> {
        let body = json!({
            "messages": [
                {
                    "role": "user",
                    "content": [{ "type": "text", "text": render_prompt(question, directive) }]
                }
            ]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload = response.text().await?;

        parse_event_stream(&payload)
    }
}

// Helpers.

/// Extract the answer from an event-stream body: the text items of the last
/// `assistant` event. A body that is a single JSON object is accepted too.
pub fn parse_event_stream(payload: &str) -> Res<String> {
    let mut events = payload
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .filter_map(|data| match serde_json::from_str::<Value>(data) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("Skipping unparseable event: {}", err);
                None
            }
        })
        .collect::<Vec<_>>();

    if events.is_empty()
        && let Ok(value) = serde_json::from_str::<Value>(payload.trim())
    {
        events.push(value);
    }

    if let Some(error) = events.iter().find_map(event_error) {
        return Err(anyhow!("Agent returned an error: {error}"));
    }

    let answer = events
        .iter()
        .rev()
        .find(|event| event.get("role").and_then(Value::as_str) == Some("assistant"))
        .map(event_text)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| anyhow!("Agent returned no answer."))?;

    Ok(answer)
}

fn event_error(event: &Value) -> Option<String> {
    match event.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(error) => Some(error.get("message").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| Value::Object(error.clone()).to_string())),
        _ => None,
    }
}

fn event_text(event: &Value) -> String {
    event
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
