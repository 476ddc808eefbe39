use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::PlannerConfig;
use crate::errors::{PilotError, PilotResult};
use crate::planner::parse::parse_plan;
use crate::planner::provider::Planner;
use crate::planner::types::{InitialPlanRequest, NextStepRequest, Plan};

/// Planner reached over HTTP. The request is POSTed as JSON tagged with
/// `kind`; the response is either a plan object or an OpenAI-compatible chat
/// completion whose message content carries the plan.
pub struct HttpPlanner {
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn from_config(cfg: &PlannerConfig) -> PilotResult<Self> {
        if cfg.endpoint.trim().is_empty() {
            return Err(PilotError::Config("planner.endpoint is not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key: cfg.resolved_api_key(),
            client,
        })
    }

    async fn post<T: Serialize>(&self, kind: &str, payload: &T) -> PilotResult<Plan> {
        let mut body = serde_json::to_value(payload)?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("kind".into(), kind.into());
            if let Some(model) = &self.model {
                obj.insert("model".into(), model.as_str().into());
            }
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            kind,
            body = %{
                let mut log_body = body.clone();
                if let Some(shot) = log_body.get_mut("screenshot").filter(|s| s.is_string()) {
                    *shot = serde_json::Value::String("<omitted_base64_image>".into());
                }
                log_body.to_string()
            },
            "sending planner request"
        );

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Planner(format!("{status}: {err_body}")));
        }

        let text = response.text().await?;
        let plan = decode_response(&text)?;
        tracing::info!(kind, steps = plan.steps.len(), "planner responded");
        Ok(plan)
    }
}

/// Unwraps a chat-completion envelope when present, then parses the plan.
pub fn decode_response(text: &str) -> PilotResult<Plan> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(choices) = value.get("choices") {
            let content = choices
                .get(0)
                .and_then(|c| c.pointer("/message/content"))
                .and_then(|c| c.as_str())
                .ok_or_else(|| PilotError::PlanParse("completion has no message content".into()))?;
            return parse_plan(content);
        }
    }
    parse_plan(text)
}

#[async_trait]
impl Planner for HttpPlanner {
    fn name(&self) -> &str {
        "http"
    }

    async fn request_initial_plan(&self, req: &InitialPlanRequest) -> PilotResult<Plan> {
        self.post("initial_plan", req).await
    }

    async fn request_next_step(&self, req: &NextStepRequest) -> PilotResult<Plan> {
        self.post("next_step", req).await
    }
}
