use crate::config::ClientConfig;
use crate::error::{ApiError, StorageError};
use crate::redact::redact_secrets;
use crate::request::{PendingRequest, RequestOptions, LOGIN_PATH, REGISTER_PATH};
use crate::retry::{execute, refresh_access_token};
use crate::session::{Session, SessionHolder};
use crate::storage::SessionStorage;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{AuthOutcome, AuthResponse, Credentials, RegisterRequest};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

const LOGIN_FAILED: &str = "Login failed";
const REGISTRATION_FAILED: &str = "Registration failed";

/// Authenticated access to the KinKeep backend.
///
/// Cheap to clone; clones share the transport and the session.
#[derive(Clone)]
pub struct KinKeepClient {
  transport: Arc<dyn Transport>,
  session: Arc<SessionHolder>,
}

impl KinKeepClient {
  pub fn new(config: &ClientConfig, storage: Arc<dyn SessionStorage>) -> Result<Self, ApiError> {
    let transport = ReqwestTransport::new(config)?;
    Ok(Self::with_transport(
      Arc::new(transport),
      Arc::new(SessionHolder::new(storage)),
    ))
  }

  pub fn with_transport(transport: Arc<dyn Transport>, session: Arc<SessionHolder>) -> Self {
    Self { transport, session }
  }

  pub fn session(&self) -> &Arc<SessionHolder> {
    &self.session
  }

  pub async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    options: RequestOptions,
  ) -> Result<Value, ApiError> {
    let request = PendingRequest::new(method, path)
      .with_body(body)
      .with_options(options);
    self.send(request).await
  }

  pub(crate) async fn send(&self, request: PendingRequest) -> Result<Value, ApiError> {
    execute(self.transport.as_ref(), &self.session, request).await
  }

  pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
    self.request(Method::GET, path, None, RequestOptions::default()).await
  }

  pub async fn get_with(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError> {
    self.request(Method::GET, path, None, options).await
  }

  pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
    self.request(Method::POST, path, body, RequestOptions::default()).await
  }

  pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
    self
      .request(Method::PUT, path, Some(body), RequestOptions::default())
      .await
  }

  pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
    self
      .request(Method::DELETE, path, None, RequestOptions::default())
      .await
  }

  pub async fn login(&self, credentials: &Credentials) -> AuthOutcome {
    let body = match serde_json::to_value(credentials) {
      Ok(v) => v,
      Err(_) => return AuthOutcome::err(LOGIN_FAILED),
    };
    let outcome = self.exchange_credentials(LOGIN_PATH, body, LOGIN_FAILED).await;
    if outcome.success {
      info!("logged in");
    }
    outcome
  }

  /// Same contract as [`login`](Self::login); a new account also needs onboarding.
  pub async fn register(&self, user: &RegisterRequest) -> AuthOutcome {
    let body = match serde_json::to_value(user) {
      Ok(v) => v,
      Err(_) => return AuthOutcome::err(REGISTRATION_FAILED),
    };
    let outcome = self
      .exchange_credentials(REGISTER_PATH, body, REGISTRATION_FAILED)
      .await;
    if outcome.success {
      self.session.set_needs_onboarding(true);
      info!("registered");
    }
    outcome
  }

  async fn exchange_credentials(&self, path: &str, body: Value, fallback: &str) -> AuthOutcome {
    let request = PendingRequest::new(Method::POST, path).with_body(Some(body));
    let json = match self.send(request).await {
      Ok(v) => v,
      Err(e) => {
        warn!(path, error = %redact_secrets(&e.to_string()), "credential exchange failed");
        return AuthOutcome::err(e.error_field().unwrap_or_else(|| fallback.to_string()));
      }
    };

    let response: AuthResponse = match serde_json::from_value(json) {
      Ok(r) => r,
      Err(e) => {
        warn!(path, error = %e, "unexpected credential exchange response");
        return AuthOutcome::err(fallback);
      }
    };

    let session = Session {
      access_token: response.access_token,
      refresh_token: response.refresh_token,
      user: response.user,
    };
    if let Err(e) = self.session.persist(&session) {
      warn!(error = %e, "failed to persist session");
      return AuthOutcome::err(fallback);
    }
    AuthOutcome::ok()
  }

  /// Forgets the session locally. The backend is not contacted.
  pub fn logout(&self) -> Result<(), StorageError> {
    self.session.clear()?;
    info!("logged out");
    Ok(())
  }

  /// Mints a new access token now, outside of any failing request.
  pub async fn refresh(&self) -> Result<String, ApiError> {
    let current = self.session.access_token()?;
    refresh_access_token(self.transport.as_ref(), &self.session, current.as_deref()).await
  }

  pub fn restore(&self) -> Result<Option<Value>, StorageError> {
    self.session.restore()
  }

  pub fn is_authenticated(&self) -> bool {
    self.session.is_authenticated()
  }

  pub fn current_user(&self) -> Option<Value> {
    self.session.user().ok().flatten()
  }

  pub fn needs_onboarding(&self) -> bool {
    self.session.needs_onboarding()
  }

  pub fn complete_onboarding(&self) {
    self.session.complete_onboarding();
  }
}
