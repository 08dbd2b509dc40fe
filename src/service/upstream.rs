//! Vision model client (OpenAI-style chat completions).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ServiceConfig;

const MAX_TOKENS: u32 = 512;

const PROMPT: &str = "Analyze the image below for any potential threats to public safety. \
Please respond with 'dangerous' if a threat is detected, or 'not dangerous' otherwise. \
Include a description if a threat is present. ";

/// Something that can look at a JPEG and describe threats in it.
///
/// `Ok(None)` means the model answered without any usable text.
pub trait ThreatModel: Send {
    fn analyze(&self, image_b64: &str) -> Result<Option<String>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct ChatCompletionsModel {
    agent: ureq::Agent,
    invoke_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsModel {
    pub fn new(
        invoke_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            invoke_url: invoke_url.into(),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_config(cfg: &ServiceConfig) -> Self {
        if cfg.api_key.is_none() {
            log::warn!("upstream: API_KEY is not set; requests will be unauthenticated");
        }
        Self::new(
            cfg.invoke_url.clone(),
            cfg.model.clone(),
            cfg.api_key.clone(),
            cfg.upstream_timeout,
        )
    }
}

impl ThreatModel for ChatCompletionsModel {
    fn analyze(&self, image_b64: &str) -> Result<Option<String>> {
        let body = serde_json::to_vec(&build_request(&self.model, image_b64))?;

        let mut request = self
            .agent
            .post(&self.invoke_url)
            .set("Accept", "application/json")
            .set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        let response = match request.send_bytes(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!("upstream returned status {}: {}", code, detail.trim()));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context(format!("post to {}", self.invoke_url)))
            }
        };

        let text = response.into_string().context("read upstream response")?;
        parse_response(&text)
    }
}

fn build_request<'a>(model: &'a str, image_b64: &str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: format!(
                "{}<img src=\"data:image/jpeg;base64,{}\" />",
                PROMPT, image_b64
            ),
        }],
        max_tokens: MAX_TOKENS,
        temperature: 0.0,
        top_p: 1.0,
    }
}

/// `choices[0].message.content`, or `None` when there are no choices.
fn parse_response(text: &str) -> Result<Option<String>> {
    let response: ChatResponse =
        serde_json::from_str(text).context("parse upstream response")?;
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content);
    if content.is_none() {
        log::warn!("upstream: no choices in the response");
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_embeds_image_as_data_uri() {
        let request = build_request("meta/llama-3.2-90b-vision-instruct", "QUJD");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "meta/llama-3.2-90b-vision-instruct");
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["top_p"], 1.0);
        assert_eq!(json["messages"][0]["role"], "user");
        let content = json["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("Analyze the image below"));
        assert!(content.ends_with("<img src=\"data:image/jpeg;base64,QUJD\" />"));
    }

    #[test]
    fn parses_first_choice() {
        let text = r#"{"choices":[{"message":{"role":"assistant","content":"dangerous: fire"}},
                       {"message":{"role":"assistant","content":"ignored"}}]}"#;
        assert_eq!(parse_response(text).unwrap().as_deref(), Some("dangerous: fire"));

        assert_eq!(parse_response(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(parse_response(r#"{"id":"x"}"#).unwrap(), None);
        assert!(parse_response("<html>").is_err());
    }
}
