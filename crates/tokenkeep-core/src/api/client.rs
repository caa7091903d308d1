//! HTTP client for the login and profile endpoints.
//!
//! `AuthApi` is the seam the session store talks through; `HttpAuthApi` is
//! the reqwest-backed implementation used in production.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::session::DEFAULT_TOKEN_TYPE;
use crate::auth::{Credentials, Session};
use crate::models::{Profile, ProfileUpdate};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const LOGIN_PATH: &str = "/auth/login";
const PROFILE_PATH: &str = "/users/me";

/// Operations the session store needs from the backend.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a session.
    async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError>;

    /// Fetch the profile of the user owning `session`. Fails with
    /// [`ApiError::Unauthorized`] when the token is invalid or expired.
    async fn get_profile(&self, session: &Session) -> Result<Profile, ApiError>;

    async fn update_profile(
        &self,
        session: &Session,
        update: &ProfileUpdate,
    ) -> Result<Profile, ApiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username_or_email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

/// API client for the auth backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send<T, B>(&self, method: Method, path: &str, auth: Option<&Session>, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json");
            if let Some(session) = auth {
                request = request.header(header::AUTHORIZATION, session.authorization_header());
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    debug!(method = %method, url = %url, "Request succeeded");
                    return response.json().await.map_err(|e| {
                        ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError> {
        let body = LoginRequest {
            username_or_email: &credentials.username_or_email,
            password: &credentials.password,
        };
        let response: LoginResponse = self
            .send(Method::POST, LOGIN_PATH, None, Some(&body))
            .await?;

        let token_type = response
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());
        Ok(Session::new(response.access_token, token_type))
    }

    async fn get_profile(&self, session: &Session) -> Result<Profile, ApiError> {
        self.send::<_, ()>(Method::GET, PROFILE_PATH, Some(session), None)
            .await
    }

    async fn update_profile(
        &self,
        session: &Session,
        update: &ProfileUpdate,
    ) -> Result<Profile, ApiError> {
        self.send(Method::PATCH, PROFILE_PATH, Some(session), Some(update))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let api = HttpAuthApi::new("https://api.example.com/v1/").unwrap();
        assert_eq!(api.base_url(), "https://api.example.com/v1");
        assert_eq!(api.url(LOGIN_PATH), "https://api.example.com/v1/auth/login");
    }

    #[test]
    fn test_login_request_wire_format() {
        let body = LoginRequest {
            username_or_email: "a",
            password: "b",
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"usernameOrEmail":"a","password":"b"}"#
        );
    }

    #[test]
    fn test_login_response_tolerates_missing_token_type() {
        let parsed: LoginResponse = serde_json::from_str(r#"{"accessToken":"t"}"#).unwrap();
        assert_eq!(parsed.access_token, "t");
        assert!(parsed.token_type.is_none());
    }
}
