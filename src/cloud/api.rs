//! Shared REST plumbing for provider adapters

use crate::error::{Result, SkyhookError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Timeout applied to every provider API call
pub const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer-token JSON client for one provider API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    provider: &'static str,
}

impl ApiClient {
    pub fn new(provider: &'static str, base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent(concat!("skyhook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            provider,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.http.get(self.url(path));
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.http.post(self.url(path)).json(body);
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let request = self.http.delete(self.url(path));
        self.send(request).await?;
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.bearer_auth(&self.token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SkyhookError::ProviderRejected(format!(
            "{} returned {}: {}",
            self.provider,
            status,
            error_message(&body)
        )))
    }
}

/// Pull the human readable message out of a provider error body
pub fn error_message(body: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return body.trim().to_string(),
    };

    // {"message": ".."} / {"error": ".."} / {"errors": [{"reason": ".."}]}
    if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
        return message.to_string();
    }
    if let Some(message) = value.get("error").and_then(|m| m.as_str()) {
        return message.to_string();
    }
    if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
        let reasons: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("reason").and_then(|r| r.as_str()))
            .collect();
        if !reasons.is_empty() {
            return reasons.join("; ");
        }
    }

    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response, StubServer};
    use serde::Deserialize;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"id": "unprocessable_entity", "message": "Region is not available"}"#),
            "Region is not available"
        );
        assert_eq!(
            error_message(r#"{"error": "Invalid plan", "status": 400}"#),
            "Invalid plan"
        );
        assert_eq!(
            error_message(
                r#"{"errors": [{"reason": "Invalid type", "field": "type"}, {"reason": "Label taken"}]}"#
            ),
            "Invalid type; Label taken"
        );
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[derive(Debug, Deserialize)]
    struct Account {
        email: String,
    }

    #[tokio::test]
    async fn test_success_sends_bearer_token() {
        let server = StubServer::start(|_| {
            vec![response("200 OK", &[], r#"{"email": "ops@example.com"}"#)]
        })
        .await;

        let api = ApiClient::new("digitalocean", &server.base_url, "secret").unwrap();
        let account: Account = api.get("/v2/account").await.unwrap();

        assert_eq!(account.email, "ops@example.com");
        let head = server.requests()[0].to_ascii_lowercase();
        assert!(head.starts_with("get /v2/account "));
        assert!(head.contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_rejection_carries_provider_message() {
        let server = StubServer::start(|_| {
            vec![response(
                "422 Unprocessable Entity",
                &[],
                r#"{"id": "unprocessable_entity", "message": "Region is not available"}"#,
            )]
        })
        .await;

        let api = ApiClient::new("digitalocean", &server.base_url, "secret").unwrap();
        let err = api.delete("/v2/droplets/42").await.unwrap_err();

        match err {
            SkyhookError::ProviderRejected(message) => {
                assert!(message.starts_with("digitalocean returned 422"));
                assert!(message.ends_with("Region is not available"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
