use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    config::AssistantConfig,
    portal::{
        chat::{ChatService, CompletionMessage},
        error::ChatError,
    },
};

/// Client for an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: &AssistantConfig) -> reqwest::Result<Self> {
        Ok(Self {
            http: ClientBuilder::default()
                .user_agent(concat!(
                    env!("CARGO_PKG_NAME"),
                    "/",
                    env!("CARGO_PKG_VERSION")
                ))
                .build()?,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

impl ChatService for ChatClient {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, ChatError> {
        let request = |err: reqwest::Error| ChatError::Request(err.to_string());

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .map_err(request)?;

        if !response.status().is_success() {
            return Err(ChatError::Request(format!(
                "assistant returned {}",
                response.status()
            )));
        }

        let body: CompletionResponse = response.json().await.map_err(request)?;
        Ok(first_content(body))
    }
}

/// Content of the first choice; empty when the model gave none.
fn first_content(body: CompletionResponse) -> String {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_default()
}

/// The configured assistant, or none at all.
#[derive(Debug, Clone)]
pub enum Assistant {
    Disabled,
    Remote(ChatClient),
}

impl ChatService for Assistant {
    async fn complete(&self, messages: &[CompletionMessage]) -> Result<String, ChatError> {
        match self {
            Assistant::Disabled => Err(ChatError::Unconfigured),
            Assistant::Remote(client) => client.complete(messages).await,
        }
    }
}
