//! Text-completion client for the OpenAI completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One completion call: a rendered prompt plus sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub top_p: f32,
}

/// Anything that can turn a prompt into completion text.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, Error>;
}

pub struct Client {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    text: String,
}

impl Client {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key,
            base_url,
            http,
        })
    }
}

#[async_trait]
impl Completer for Client {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, Error> {
        let body = ApiRequest {
            model: &request.model,
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
        };

        let response = self
            .http
            .post(format!("{}/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        first_choice(api_response)
    }
}

fn first_choice(response: ApiResponse) -> Result<String, Error> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.text)
        .ok_or(Error::Empty)
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = ApiRequest {
            model: "gpt-3.5-turbo-instruct",
            prompt: "hi\n\nAlice: hello\n",
            max_tokens: 100,
            top_p: 1.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo-instruct");
        assert_eq!(json["prompt"], "hi\n\nAlice: hello\n");
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["top_p"], 1.0);
    }

    #[test]
    fn test_takes_first_choice() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"id":"cmpl-1","object":"text_completion","choices":[{"text":" meow!","index":0},{"text":"second","index":1}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice(response).unwrap(), " meow!");
    }

    #[test]
    fn test_no_choices_is_empty_error() {
        let response: ApiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(first_choice(response), Err(Error::Empty)));
    }
}
