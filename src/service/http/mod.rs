mod error;

pub use error::ApiError;

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, Method, Response,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use url::Url;

/// JSON-over-HTTP client for the TradeWizard REST API.
///
/// Clones share the bearer token, so installing it once after login is
/// enough for every service holding a copy.
#[derive(Clone)]
pub struct HttpService {
    client: Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpService {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        info!("Initializing HttpService for {}", base_url);

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(build_default_headers())
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn set_token(&self, token: &str) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.to_string());
        }
    }

    pub fn clear_token(&self) {
        if let Ok(mut slot) = self.token.write() {
            slot.take();
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", joined, e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<(), T>(Method::POST, path, None).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request::<(), Value>(Method::DELETE, path, None).await?;
        Ok(())
    }

    async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        debug!("{} {}", method, url);

        let mut builder = self.client.request(method.clone(), url);
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("{} {} failed: {}", method, path, e);
            ApiError::Network(e)
        })?;

        handle_response(response).await
    }
}

fn build_default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let message = error_message(status.as_u16(), &text);
        warn!("Request failed with {}: {}", status, message);
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    decode_body(&text)
}

/// Pulls a human message out of an error body, or falls back to
/// `HTTP error N`.
pub fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP error {}", status))
}

/// Accepts both bare payloads and `{ "data": ... }` envelopes.
pub fn decode_body<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };

    let value: Value = serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))?;

    match serde_json::from_value::<T>(value.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(direct) => match value.get("data") {
            Some(data) => serde_json::from_value::<T>(data.clone()).map_err(|e| ApiError::Decode(e.to_string())),
            None => Err(ApiError::Decode(direct.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::spawn_http_server;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Robot {
        id: String,
        name: String,
    }

    #[test]
    fn test_error_message_prefers_structured_fields() {
        assert_eq!(error_message(400, r#"{"message":"Phone is required"}"#), "Phone is required");
        assert_eq!(error_message(401, r#"{"error":"Invalid token"}"#), "Invalid token");
        assert_eq!(error_message(422, r#"{"detail":"Bad amount"}"#), "Bad amount");
        assert_eq!(error_message(500, "<html>boom</html>"), "HTTP error 500");
        assert_eq!(error_message(404, r#"{"message":""}"#), "HTTP error 404");
        assert_eq!(error_message(503, ""), "HTTP error 503");
    }

    #[test]
    fn test_decode_body_accepts_envelopes() {
        let bare: Robot = decode_body(r#"{"id":"r1","name":"Scalper"}"#).unwrap();
        let wrapped: Robot = decode_body(r#"{"success":true,"data":{"id":"r1","name":"Scalper"}}"#).unwrap();
        assert_eq!(bare, wrapped);

        assert!(decode_body::<()>("").is_ok());
        assert!(decode_body::<Option<Robot>>("null").unwrap().is_none());

        assert!(matches!(decode_body::<Robot>("{}"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn test_url_joining() {
        let http = HttpService::new(Url::parse("http://localhost:5000/").unwrap(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            http.url("/api/robots").unwrap().as_str(),
            "http://localhost:5000/api/robots"
        );
        assert_eq!(http.url("api/robots/7").unwrap().as_str(), "http://localhost:5000/api/robots/7");
    }

    #[tokio::test]
    async fn test_bearer_token_and_status_errors() {
        let server = spawn_http_server(vec![
            (200, r#"{"id":"r1","name":"Scalper"}"#.to_string()),
            (403, r#"{"message":"Admins only"}"#.to_string()),
        ])
        .await;

        let http = HttpService::new(server.base_url.clone(), Duration::from_secs(5)).unwrap();
        http.set_token("secret-token");

        let robot: Robot = http.get_json("/api/robots/r1").await.unwrap();
        assert_eq!(robot.name, "Scalper");

        let err = http.delete("/api/robots/r1").await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "Admins only");

        let requests = server.requests.lock().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/api/robots/r1");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer secret-token"));
        assert_eq!(requests[1].method, "DELETE");
    }
}
