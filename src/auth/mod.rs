use log::{ info, warn };
use serde_json::Value;
use thiserror::Error;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity token rejected: {0}")]
    Rejected(String),

    #[error("identity provider unreachable: {0}")]
    Unavailable(String),
}

/// Checks Google-issued identity tokens from the sign-in button.
pub struct GoogleTokenVerifier {
    http: reqwest::Client,
    client_id: Option<String>,
    tokeninfo_url: String,
}

impl GoogleTokenVerifier {
    pub fn new(http: reqwest::Client, client_id: Option<String>) -> Self {
        Self {
            http,
            client_id: client_id.filter(|c| !c.trim().is_empty()),
            tokeninfo_url: TOKENINFO_URL.to_string(),
        }
    }

    /// Returns the token's claims once Google accepts it and, when a client
    /// id is configured, the audience matches.
    pub async fn verify(&self, credential: &str) -> Result<Value, AuthError> {
        let resp = self.http
            .get(&self.tokeninfo_url)
            .query(&[("id_token", credential)])
            .send().await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(body));
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!("token info returned {}", status)));
        }

        let claims: Value = resp.json().await.map_err(|e| AuthError::Unavailable(e.to_string()))?;
        self.check_audience(&claims)?;

        info!(
            "Google ID token verified. User ID: {}",
            claims.get("sub").and_then(Value::as_str).unwrap_or("unknown")
        );
        Ok(claims)
    }

    fn check_audience(&self, claims: &Value) -> Result<(), AuthError> {
        let Some(expected) = &self.client_id else {
            warn!("GOOGLE_CLIENT_ID not set; accepting token without audience check.");
            return Ok(());
        };
        match claims.get("aud").and_then(Value::as_str) {
            Some(aud) if aud == expected => Ok(()),
            other => Err(AuthError::Rejected(format!("unexpected audience {:?}", other))),
        }
    }
}
