//! Refresh-once, retry-once policy for authenticated requests.
//!
//! Per request:
//!
//! ```text
//! Initial -> Sent -> Success
//!                 -> FailedTerminal
//!                 -> FailedRetriable -> Refreshing -> RetriedSuccess
//!                                                  -> RetriedFailed
//! ```
//!
//! A 401 is retriable only when the request has not been retried, is not the
//! refresh call itself, is not a login/registration, and a refresh token is
//! stored. Any other 401 ends the session.

use crate::error::ApiError;
use crate::redact::redact_secrets;
use crate::request::{PendingRequest, REFRESH_PATH};
use crate::session::SessionHolder;
use crate::transport::{HttpResponse, Transport};
use crate::types::RefreshResponse;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum Attempt {
    Success(Value),
    NeedsRefresh(ApiError),
    Failed(ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Initial,
    Sent,
    Success,
    FailedRetriable,
    Refreshing,
    RetriedSuccess,
    RetriedFailed,
    FailedTerminal,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::RetriedSuccess | Self::RetriedFailed | Self::FailedTerminal
        )
    }
}

struct Tracker {
    state: RequestState,
}

impl Tracker {
    fn new() -> Self {
        Self {
            state: RequestState::Initial,
        }
    }

    fn to(&mut self, next: RequestState) {
        debug!(from = ?self.state, to = ?next, "request state");
        self.state = next;
    }
}

/// Tags one attempt's result. Transport errors are never retriable.
pub fn classify(
    request: &PendingRequest,
    result: Result<HttpResponse, ApiError>,
    has_refresh_token: bool,
) -> Attempt {
    let response = match result {
        Ok(r) => r,
        Err(e) => return Attempt::Failed(e),
    };

    if response.is_success() {
        return Attempt::Success(response.body);
    }

    let err = ApiError::from_status(response.status, response.body);
    let retriable = err.is_unauthorized()
        && !request.retried()
        && !request.is_refresh()
        && !request.is_credential_exchange()
        && has_refresh_token;

    if retriable {
        Attempt::NeedsRefresh(err)
    } else {
        Attempt::Failed(err)
    }
}

fn ends_session(request: &PendingRequest, err: &ApiError) -> bool {
    err.is_unauthorized() && !request.is_credential_exchange()
}

fn clear_session(session: &SessionHolder, reason: &str) {
    warn!(reason, "clearing session");
    if let Err(e) = session.clear() {
        warn!(error = %e, "failed to clear session");
    }
}

/// Sends `request` with the stored access token and applies the refresh policy.
#[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
pub async fn execute<T>(
    transport: &T,
    session: &SessionHolder,
    mut request: PendingRequest,
) -> Result<Value, ApiError>
where
    T: Transport + ?Sized,
{
    let mut tracker = Tracker::new();

    let sent_with = session.access_token()?;
    tracker.to(RequestState::Sent);
    let result = transport.send(&request, sent_with.as_deref()).await;
    let has_refresh_token = session.refresh_token()?.is_some();

    let original = match classify(&request, result, has_refresh_token) {
        Attempt::Success(body) => {
            tracker.to(RequestState::Success);
            return Ok(body);
        }
        Attempt::Failed(err) => {
            tracker.to(RequestState::FailedTerminal);
            if ends_session(&request, &err) {
                clear_session(session, "unauthorized without a usable refresh token");
            }
            return Err(err);
        }
        Attempt::NeedsRefresh(err) => err,
    };

    tracker.to(RequestState::FailedRetriable);
    request.mark_retried();
    tracker.to(RequestState::Refreshing);

    let fresh = match refresh_access_token(transport, session, sent_with.as_deref()).await {
        Ok(token) => token,
        Err(e) => {
            tracker.to(RequestState::RetriedFailed);
            debug!(error = %redact_secrets(&e.to_string()), "refresh failed");
            clear_session(session, "token refresh failed");
            return Err(original);
        }
    };

    let result = transport.send(&request, Some(&fresh)).await;
    match classify(&request, result, true) {
        Attempt::Success(body) => {
            tracker.to(RequestState::RetriedSuccess);
            Ok(body)
        }
        Attempt::Failed(err) | Attempt::NeedsRefresh(err) => {
            tracker.to(RequestState::RetriedFailed);
            if ends_session(&request, &err) {
                clear_session(session, "refreshed token was rejected");
            }
            Err(err)
        }
    }
}

/// Mints a new access token from the stored refresh token and persists it.
///
/// Refreshes are single-flight: if another request already replaced the
/// token this request was sent with, that token is returned without calling
/// the refresh endpoint again.
pub async fn refresh_access_token<T>(
    transport: &T,
    session: &SessionHolder,
    stale: Option<&str>,
) -> Result<String, ApiError>
where
    T: Transport + ?Sized,
{
    let _gate = session.lock_refresh().await;

    if let Some(current) = session.access_token()? {
        if stale != Some(current.as_str()) {
            debug!("access token already refreshed by a concurrent request");
            return Ok(current);
        }
    }

    let Some(refresh_token) = session.refresh_token()? else {
        return Err(ApiError::from_status(
            401,
            json!({"error": "refresh token is not available"}),
        ));
    };

    let request = PendingRequest::new(Method::POST, REFRESH_PATH).with_body(Some(json!({})));
    let response = transport.send(&request, Some(&refresh_token)).await?;
    if !response.is_success() {
        return Err(ApiError::from_status(response.status, response.body));
    }

    let refreshed: RefreshResponse = serde_json::from_value(response.body)?;
    let token = refreshed.access_token.trim();
    if token.is_empty() {
        return Err(ApiError::InvalidRequest(
            "refresh response carried an empty access token".to_string(),
        ));
    }

    session.set_access_token(token)?;
    info!("access token refreshed");
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::storage::{MemoryStorage, SessionStorage, SESSION_KEYS};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        path: String,
        bearer: Option<String>,
        retried: bool,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, ApiError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<(u16, Value)>) -> Self {
            Self::with_results(
                responses
                    .into_iter()
                    .map(|(status, body)| Ok(HttpResponse { status, body }))
                    .collect(),
            )
        }

        fn with_results(results: Vec<Result<HttpResponse, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(results.into()),
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, path: &str) -> usize {
            self.calls().iter().filter(|c| c.path == path).count()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: &PendingRequest,
            bearer: Option<&str>,
        ) -> Result<HttpResponse, ApiError> {
            self.calls.lock().unwrap().push(Call {
                path: request.path.clone(),
                bearer: bearer.map(str::to_string),
                retried: request.retried(),
            });
            let next = self.responses.lock().unwrap().pop_front();
            next.expect("unscripted request")
        }
    }

    fn logged_in() -> (Arc<MemoryStorage>, SessionHolder) {
        let storage = Arc::new(MemoryStorage::new());
        let holder = SessionHolder::new(storage.clone());
        holder
            .persist(&Session {
                access_token: "old".to_string(),
                refresh_token: "r1".to_string(),
                user: json!({"id": 1}),
            })
            .unwrap();
        (storage, holder)
    }

    fn assert_cleared(storage: &MemoryStorage) {
        for key in SESSION_KEYS {
            assert_eq!(storage.get(key).unwrap(), None, "{key} should be cleared");
        }
    }

    fn get(path: &str) -> PendingRequest {
        PendingRequest::new(Method::GET, path)
    }

    #[tokio::test]
    async fn success_attaches_stored_token() {
        let (_, session) = logged_in();
        let transport = ScriptedTransport::new(vec![(200, json!({"id": 1}))]);

        let body = execute(&transport, &session, get("/users/me")).await.unwrap();

        assert_eq!(body, json!({"id": 1}));
        assert_eq!(transport.calls()[0].bearer.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_retries_once() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![
            (401, json!({"msg": "Token has expired"})),
            (200, json!({"access_token": "new"})),
            (200, json!({"families": []})),
        ]);

        let body = execute(&transport, &session, get("/families")).await.unwrap();

        assert_eq!(body, json!({"families": []}));
        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(transport.count("/families"), 2);
        assert_eq!(calls[1].bearer.as_deref(), Some("r1"));
        assert_eq!(calls[2].bearer.as_deref(), Some("new"));
        assert!(calls[2].retried);
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("new"));
        assert_eq!(storage.get("refresh_token").unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn failed_refresh_clears_session_and_returns_original_error() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![
            (401, json!({"error": "expired"})),
            (401, json!({"error": "refresh expired"})),
        ]);

        let err = execute(&transport, &session, get("/stories"))
            .await
            .unwrap_err();

        assert_eq!(err.server_message().as_deref(), Some("expired"));
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_cleared(&storage);
    }

    #[tokio::test]
    async fn transport_error_passes_through_without_retry() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::with_results(vec![Err(ApiError::InvalidRequest(
            "connection refused".to_string(),
        ))]);

        let err = execute(&transport, &session, get("/families"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidRequest(ref m) if m == "connection refused"));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("old"));
        assert_eq!(storage.get("refresh_token").unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn refresh_transport_error_clears_session_and_returns_original_error() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::with_results(vec![
            Ok(HttpResponse {
                status: 401,
                body: json!({"error": "expired"}),
            }),
            Err(ApiError::InvalidRequest("connection reset".to_string())),
        ]);

        let err = execute(&transport, &session, get("/families"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(err.server_message().as_deref(), Some("expired"));
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(transport.count("/families"), 1);
        assert_cleared(&storage);
    }

    #[tokio::test]
    async fn refresh_endpoint_is_never_refreshed() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![(401, json!({"error": "bad refresh"}))]);

        let req = PendingRequest::new(Method::POST, REFRESH_PATH);
        let err = execute(&transport, &session, req).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(transport.calls().len(), 1);
        assert_cleared(&storage);
    }

    #[tokio::test]
    async fn missing_refresh_token_clears_session_without_refresh_call() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("access_token", "old").unwrap();
        storage.set("user", "{}").unwrap();
        let session = SessionHolder::new(storage.clone());
        let transport = ScriptedTransport::new(vec![(401, json!({"error": "expired"}))]);

        let err = execute(&transport, &session, get("/posts")).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(transport.calls().len(), 1);
        assert_cleared(&storage);
    }

    #[tokio::test]
    async fn non_401_errors_pass_through_untouched() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![(500, json!({"error": "boom"}))]);

        let err = execute(&transport, &session, get("/posts")).await.unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn retried_401_ends_session_without_second_refresh() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![
            (401, json!({"error": "expired"})),
            (200, json!({"access_token": "new"})),
            (401, json!({"error": "still no"})),
        ]);

        let err = execute(&transport, &session, get("/users/me"))
            .await
            .unwrap_err();

        assert_eq!(err.server_message().as_deref(), Some("still no"));
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_cleared(&storage);
    }

    #[tokio::test]
    async fn retried_server_error_keeps_refreshed_session() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![
            (401, json!({"error": "expired"})),
            (200, json!({"access_token": "new"})),
            (503, json!({"error": "maintenance"})),
        ]);

        let err = execute(&transport, &session, get("/users/me"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn login_401_leaves_session_alone() {
        let (storage, session) = logged_in();
        let transport = ScriptedTransport::new(vec![(401, json!({"error": "Invalid credentials"}))]);

        let req = PendingRequest::new(Method::POST, "/auth/login");
        let err = execute(&transport, &session, req).await.unwrap_err();

        assert_eq!(err.server_message().as_deref(), Some("Invalid credentials"));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(storage.get("refresh_token").unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn refresh_reuses_token_replaced_by_concurrent_request() {
        let (_, session) = logged_in();
        session.set_access_token("already-new").unwrap();
        let transport = ScriptedTransport::new(vec![]);

        let token = refresh_access_token(&transport, &session, Some("old"))
            .await
            .unwrap();

        assert_eq!(token, "already-new");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn refresh_rejects_response_without_token() {
        let (_, session) = logged_in();
        let transport = ScriptedTransport::new(vec![(200, json!({"unexpected": true}))]);

        let err = refresh_access_token(&transport, &session, Some("old"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn classify_tags_outcomes() {
        let req = get("/users/me");
        let ok = Ok(HttpResponse {
            status: 204,
            body: Value::Null,
        });
        assert!(matches!(classify(&req, ok, true), Attempt::Success(Value::Null)));

        let unauthorized = || {
            Ok(HttpResponse {
                status: 401,
                body: json!({}),
            })
        };
        assert!(matches!(
            classify(&req, unauthorized(), true),
            Attempt::NeedsRefresh(_)
        ));
        assert!(matches!(
            classify(&req, unauthorized(), false),
            Attempt::Failed(_)
        ));

        let mut retried = get("/users/me");
        retried.mark_retried();
        assert!(matches!(
            classify(&retried, unauthorized(), true),
            Attempt::Failed(_)
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(RequestState::RetriedFailed.is_terminal());
        assert!(RequestState::FailedTerminal.is_terminal());
        assert!(!RequestState::Refreshing.is_terminal());
        assert!(!RequestState::Initial.is_terminal());
    }
}
