//! WebDriver-protocol session over HTTP.

use super::{AutomationSession, SessionFactory};
use crate::config::ServerConfig;
use crate::errors::GuardError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(timeout: Duration) -> Result<Client, GuardError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| GuardError::Internal(format!("failed to build HTTP client: {}", e)))
}

/// Turn a WebDriver response into its `value`, mapping protocol errors.
async fn read_value(response: reqwest::Response) -> Result<Value, GuardError> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(body.get("value").cloned().unwrap_or(body));
    }

    let error = body["value"]["error"].as_str().unwrap_or_default();
    let message = body["value"]["message"]
        .as_str()
        .filter(|m| !m.is_empty())
        .unwrap_or(error);

    if error == "invalid session id" || status == StatusCode::NOT_FOUND {
        return Err(GuardError::SessionInvalid(if message.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            message.to_string()
        }));
    }
    Err(GuardError::Server(format!("HTTP {}: {}", status.as_u16(), message)))
}

pub struct WebDriverSession {
    http: Client,
    base_url: String,
    id: String,
}

impl WebDriverSession {
    fn url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.id, suffix)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl AutomationSession for WebDriverSession {
    fn session_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    async fn ping(&self) -> Result<(), GuardError> {
        let response = self.http.get(self.url("/timeouts")).send().await?;
        read_value(response).await.map(|_| ())
    }

    async fn current_location(&self) -> Option<String> {
        let response = self.http.get(self.url("/url")).send().await.ok()?;
        read_value(response)
            .await
            .ok()?
            .as_str()
            .map(str::to_string)
    }

    async fn restore_location(&self, location: &str) -> Result<(), GuardError> {
        let response = self
            .http
            .post(self.url("/url"))
            .json(&json!({ "url": location }))
            .send()
            .await?;
        read_value(response).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), GuardError> {
        let response = self.http.delete(self.url("")).send().await?;
        read_value(response).await.map(|_| ())
    }
}

/// Creates sessions with `POST /session`.
pub struct WebDriverSessionFactory {
    http: Client,
    base_url: String,
    capabilities: Value,
}

impl WebDriverSessionFactory {
    pub fn new(config: &ServerConfig) -> Result<Self, GuardError> {
        Ok(Self {
            http: build_client(REQUEST_TIMEOUT)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            capabilities: config.capabilities.clone().unwrap_or_else(|| json!({})),
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessionFactory {
    async fn create(&self) -> Result<Arc<dyn AutomationSession>, GuardError> {
        let body = json!({
            "capabilities": {
                "alwaysMatch": self.capabilities,
                "firstMatch": [{}],
            }
        });
        debug!(url = %self.base_url, "Creating automation session");
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await?;
        let value = read_value(response).await?;

        let id = value["sessionId"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();
        info!(session_id = %id, "Automation session created");

        Ok(Arc::new(WebDriverSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStatusServer;

    fn config_for(url: &str) -> ServerConfig {
        ServerConfig {
            base_url: url.to_string(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_create_ping_close() {
        let server = MockStatusServer::start().await.unwrap();
        let factory = WebDriverSessionFactory::new(&config_for(server.url())).unwrap();

        let session = factory.create().await.unwrap();
        let id = session.session_id().unwrap();
        assert!(!id.is_empty());
        session.ping().await.unwrap();
        assert_eq!(
            session.current_location().await.as_deref(),
            Some("app://home")
        );

        session.close().await.unwrap();
        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, GuardError::SessionInvalid(_)));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_invalidated_session_reports_invalid() {
        let server = MockStatusServer::start().await.unwrap();
        let factory = WebDriverSessionFactory::new(&config_for(server.url())).unwrap();
        let session = factory.create().await.unwrap();

        server.invalidate_sessions();
        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, GuardError::SessionInvalid(_)));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_create_against_closed_port_is_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let factory =
            WebDriverSessionFactory::new(&config_for(&format!("http://127.0.0.1:{}", port)))
                .unwrap();
        let err = factory.create().await.err().unwrap();
        assert!(matches!(err, GuardError::Network(_)));
    }
}
