//! Session continuity client
//!
//! Attaches the stored access token to every call. When the authority answers
//! 401, the client performs one refresh through the cookie-borne refresh
//! token, stores the new access token and replays the call once. A call that
//! has already been replayed is never refreshed again.

use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use super::{AccessTokenStore, ClientError};
use crate::contract::{
    AccessTokenResponse, ApiError, LoginRequest, MessageResponse, RegisterRequest,
    RegisterResponse, ValidateTokenRequest, ValidateTokenResponse, paths,
};

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One logical call against the authority.
///
/// Cloneable so it can be replayed after a refresh.
#[derive(Debug, Clone)]
pub struct ApiCall {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiCall {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json(mut self, body: &impl Serialize) -> Result<Self, ClientError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mark this call as already replayed after a refresh
    pub fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Client for the authentication API that keeps the session alive.
/// Clone is cheap and clones share both the access token and the cookie jar.
#[derive(Clone)]
pub struct SessionClient {
    http: Client,
    base_url: String,
    tokens: AccessTokenStore,
}

impl SessionClient {
    /// Create a client for the authority at `base_url` (e.g. `http://localhost:5000`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: AccessTokenStore::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current access token, if any
    pub async fn access_token(&self) -> Option<String> {
        self.tokens.get().await
    }

    /// Replace (or drop) the stored access token
    pub async fn set_access_token(&self, token: Option<String>) {
        match token {
            Some(token) => self.tokens.set(token).await,
            None => self.tokens.clear().await,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a call once with whatever access token is stored right now
    async fn send(&self, call: &ApiCall) -> Result<Response, ClientError> {
        let mut request = self.http.request(call.method.clone(), self.url(&call.path));

        if let Some(token) = self.tokens.get().await {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Turn a non-success response into `ClientError::Api`
    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ApiError>(&text)
            .unwrap_or_else(|_| ApiError::new(text, "UNKNOWN"));

        Err(ClientError::Api { status, body })
    }

    /// Execute a call, refreshing the access token and replaying once on 401.
    ///
    /// If the refresh fails the original 401 is returned; the refresh failure
    /// is only logged.
    pub async fn execute(&self, mut call: ApiCall) -> Result<Response, ClientError> {
        let response = self.send(&call).await?;

        if response.status() != StatusCode::UNAUTHORIZED || call.is_retried() {
            return Self::check(response).await;
        }

        let original = Self::check(response).await;
        call.mark_retried();

        match self.refresh_access_token().await {
            Ok(_) => {
                tracing::debug!("Replaying {} {} after refresh", call.method, call.path);
                let replay = self.send(&call).await?;
                Self::check(replay).await
            }
            Err(e) => {
                tracing::warn!("Session refresh failed: {}", e);
                original
            }
        }
    }

    /// Exchange the refresh cookie for a new access token and store it.
    ///
    /// Never goes through [`execute`](Self::execute), so it cannot recurse.
    pub async fn refresh_access_token(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url(paths::REFRESH_TOKEN))
            .send()
            .await?;
        let refreshed: AccessTokenResponse = Self::check(response).await?.json().await?;

        self.tokens.set(refreshed.access_token.clone()).await;
        Ok(refreshed.access_token)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        Ok(self.execute(ApiCall::get(path)).await?.json().await?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        Ok(self.execute(ApiCall::post(path).json(body)?).await?.json().await?)
    }

    /// Register and keep the returned access token
    pub async fn register(
        &self,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, ClientError> {
        let response: RegisterResponse = self.post_json(paths::REGISTER, request).await?;
        self.tokens.set(response.token.clone()).await;
        Ok(response)
    }

    /// Log in; the authority sets the refresh cookie, the access token is kept here
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ClientError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AccessTokenResponse = self.post_json(paths::LOGIN, &request).await?;

        self.tokens.set(response.access_token.clone()).await;
        Ok(response.access_token)
    }

    /// Log out and forget the access token. The authority clears the cookie.
    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        let response: MessageResponse = self
            .execute(ApiCall::post(paths::LOGOUT))
            .await?
            .json()
            .await?;
        self.tokens.clear().await;
        Ok(response)
    }

    /// Ask the authority whether `token` is valid.
    ///
    /// A 401 here is about `token`, not the session, so it is never refreshed.
    pub async fn validate_token(&self, token: &str) -> Result<ValidateTokenResponse, ClientError> {
        let request = ValidateTokenRequest {
            token: token.to_string(),
        };
        let call = ApiCall::post(paths::VALIDATE_TOKEN).json(&request)?;
        Ok(Self::check(self.send(&call).await?).await?.json().await?)
    }

    /// Resume a session at start-up.
    ///
    /// A stored access token is checked against the authority and dropped when
    /// it no longer validates. Without a usable access token, the refresh
    /// cookie is tried. Returns `false` when there is no session to resume.
    pub async fn restore_session(&self) -> bool {
        if let Some(token) = self.tokens.get().await {
            match self.validate_token(&token).await {
                Ok(_) => return true,
                Err(e) => {
                    tracing::debug!("Stored access token rejected: {}", e);
                    self.tokens.clear().await;
                }
            }
        }

        match self.refresh_access_token().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("No session to restore: {}", e);
                false
            }
        }
    }

    pub async fn protected(&self) -> Result<MessageResponse, ClientError> {
        self.get_json(paths::PROTECTED).await
    }

    pub async fn admin(&self) -> Result<MessageResponse, ClientError> {
        self.get_json(paths::ADMIN).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_call_retry_marker() {
        let mut call = ApiCall::get(paths::PROTECTED);
        assert!(!call.is_retried());

        let replay = call.clone();
        call.mark_retried();

        assert!(call.is_retried());
        // Marker is per logical call
        assert!(!replay.is_retried());
    }

    #[test]
    fn test_api_call_json_body() {
        let call = ApiCall::post(paths::LOGIN)
            .json(&LoginRequest {
                email: "ada@example.com".to_string(),
                password: "secret123".to_string(),
            })
            .unwrap();

        assert_eq!(call.method(), &Method::POST);
        assert_eq!(call.path(), "/auth/login");
        assert_eq!(
            call.body.as_ref().unwrap()["email"],
            serde_json::json!("ada@example.com")
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = SessionClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(client.url(paths::LOGIN), "http://localhost:5000/auth/login");
    }

    #[tokio::test]
    async fn test_set_access_token() {
        let client = SessionClient::new("http://localhost:5000").unwrap();
        assert!(client.access_token().await.is_none());

        client.set_access_token(Some("abc".to_string())).await;
        assert_eq!(client.access_token().await.as_deref(), Some("abc"));

        client.set_access_token(None).await;
        assert!(client.access_token().await.is_none());
    }
}
