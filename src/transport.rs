use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::request::{PendingRequest, RequestBody, UploadForm};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use serde_json::Value;

/// Raw outcome of one HTTP exchange. Non-2xx statuses are not errors here;
/// the orchestrator decides what they mean.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request`, attaching `bearer` as `Authorization: Bearer <token>`
    /// when present. Only transport-level failures are returned as `Err`.
    async fn send(
        &self,
        request: &PendingRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ApiError>;
}

pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

fn build_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers
}

fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ApiError::InvalidRequest("token is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

fn build_form(upload: &UploadForm) -> Result<Form, ApiError> {
    let part = Part::bytes(upload.bytes.clone())
        .file_name(upload.file_name.clone())
        .mime_str(&upload.mime_type)
        .map_err(|_| ApiError::InvalidRequest(format!("bad mime type {}", upload.mime_type)))?;
    Ok(Form::new()
        .part("file", part)
        .text("type", upload.kind.clone())
        .text("folder", upload.folder.clone()))
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .default_headers(build_headers(&config.user_agent))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &PendingRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, bearer_header(token)?);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(upload) => builder.multipart(build_form(upload)?),
        };

        let res = builder.send().await?;
        let status = res.status().as_u16();
        let text = res.text().await?;
        Ok(HttpResponse {
            status,
            body: parse_body(&text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn transport(base: &str) -> ReqwestTransport {
        let config = ClientConfig {
            base_url: base.to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            user_agent: "kinkeep-test".to_string(),
        };
        ReqwestTransport::new(&config).unwrap()
    }

    #[test]
    fn url_joins_base_and_path() {
        let t = transport("http://localhost:5001");
        assert_eq!(t.url("/users/me"), "http://localhost:5001/users/me");
        assert_eq!(t.url("families"), "http://localhost:5001/families");
        assert_eq!(t.url("https://cdn.example/x"), "https://cdn.example/x");
    }

    #[test]
    fn parse_body_handles_empty_and_non_json() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"ok\":true}"), json!({"ok": true}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let value = bearer_header("abc").unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().unwrap(), "Bearer abc");
        assert!(bearer_header("bad\ntoken").is_err());
    }
}
