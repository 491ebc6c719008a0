//! Signup, login and logout against the backend, with the bearer token kept in
//! key/value storage under its own key.
//!
//! These are the only flows whose errors are meant for the user: `AuthError::user_message`
//! gives the text to show next to the form.

use std::sync::Arc;

use crate::api::{ApiError, ChatGateway, LoginRequest, SignupRequest, User};
use crate::storage::{KeyValueStorage, StorageError};

/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "token";

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NoToken(&'static str),
    #[error("not logged in")]
    NotLoggedIn,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Invalid(m) => m.clone(),
            AuthError::NoToken(m) => m.to_string(),
            AuthError::NotLoggedIn => "You are not logged in.".to_string(),
            AuthError::Api(e) => e.user_message(),
            AuthError::Storage(_) => "Could not save your session on this device.".to_string(),
        }
    }
}

/// Persisted bearer token.
#[derive(Clone)]
pub struct Credentials {
    storage: Arc<dyn KeyValueStorage>,
}

impl Credentials {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Stored token, if any. Read errors are logged and treated as logged out.
    pub fn token(&self) -> Option<String> {
        match self.storage.get(TOKEN_KEY) {
            Ok(t) => t.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                log::warn!("failed to read stored token: {}", e);
                None
            }
        }
    }

    pub fn store(&self, token: &str) -> Result<(), StorageError> {
        self.storage.set(TOKEN_KEY, token)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(TOKEN_KEY)
    }
}

/// Auth flows over a gateway and the credential store.
pub struct AuthClient {
    gateway: Arc<dyn ChatGateway>,
    credentials: Credentials,
}

impl AuthClient {
    pub fn new(gateway: Arc<dyn ChatGateway>, credentials: Credentials) -> Self {
        Self {
            gateway,
            credentials,
        }
    }

    /// Register and store the returned token. Password must be at least 8 characters;
    /// an empty phone is left out of the request.
    pub async fn signup(
        &self,
        email: &str,
        phone: Option<&str>,
        password: &str,
    ) -> Result<String, AuthError> {
        let email = validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Invalid(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            )));
        }
        let req = SignupRequest {
            email,
            phone: phone
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            password: password.to_string(),
        };
        let token = self
            .gateway
            .signup(&req)
            .await?
            .into_token()
            .ok_or(AuthError::NoToken("Registration failed. Check your inputs."))?;
        self.credentials.store(&token)?;
        log::info!("signed up {}", req.email);
        Ok(token)
    }

    /// Log in and store the returned token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let email = validate_email(email)?;
        if password.is_empty() {
            return Err(AuthError::Invalid("Password is required.".to_string()));
        }
        let req = LoginRequest {
            email,
            password: password.to_string(),
        };
        let token = self
            .gateway
            .login(&req)
            .await?
            .into_token()
            .ok_or(AuthError::NoToken("Invalid login details."))?;
        self.credentials.store(&token)?;
        log::info!("logged in as {}", req.email);
        Ok(token)
    }

    /// Tell the backend to end the session, then clear the stored token regardless.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let token = self.credentials.token().ok_or(AuthError::NotLoggedIn)?;
        if let Err(e) = self.gateway.logout(&token).await {
            log::warn!("backend logout failed, clearing local token anyway: {}", e);
        }
        self.credentials.clear()?;
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User, AuthError> {
        let token = self.credentials.token().ok_or(AuthError::NotLoggedIn)?;
        Ok(self.gateway.current_user(&token).await?)
    }
}

fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthError::Invalid("Enter a valid email address.".to_string()));
    }
    Ok(email.to_string())
}
