use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;

pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";

/// File payload for `POST /upload`, kept as owned bytes so the form can be
/// rebuilt when the request is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadForm {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub kind: String,
    pub folder: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(UploadForm),
}

impl From<Option<Value>> for RequestBody {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Empty, Self::Json)
    }
}

impl From<UploadForm> for RequestBody {
    fn from(form: UploadForm) -> Self {
        Self::Multipart(form)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn with_query<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: ToString,
    {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            retried: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.query.extend(options.query);
        self.headers.extend(options.headers);
        self
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// One-shot: returns false if the request was already marked.
    pub(crate) fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    fn normalized_path(&self) -> &str {
        let path = self.path.split(['?', '#']).next().unwrap_or_default();
        path.trim_end_matches('/')
    }

    pub fn is_refresh(&self) -> bool {
        self.normalized_path().ends_with(REFRESH_PATH)
    }

    /// Login and registration answer 401 for bad credentials, not for an
    /// expired session.
    pub fn is_credential_exchange(&self) -> bool {
        let path = self.normalized_path();
        path.ends_with(LOGIN_PATH) || path.ends_with(REGISTER_PATH)
    }
}
