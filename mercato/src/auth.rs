use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

/// Claims carried by a client bearer token.
#[derive(Debug, Deserialize)]
struct Claims {
    /// The authenticated user id.
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Validates HS256 bearer tokens on WebSocket accept.
///
/// Token issuance lives elsewhere; this side only verifies the signature
/// and expiry and extracts the user id. With no secret configured every
/// connection is anonymous.
pub struct JwtVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtVerifier {
    /// A verifier over the shared HS256 secret, or a pass-through when no
    /// secret is configured.
    #[must_use]
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// The user id behind `token`, or `None` when the token is absent,
    /// invalid, expired, or no secret is configured.
    #[must_use]
    pub fn user_id(&self, token: Option<&str>) -> Option<String> {
        let key = self.key.as_ref()?;
        let token = token?.trim();
        if token.is_empty() {
            return None;
        }
        match decode::<Claims>(token, key, &self.validation) {
            Ok(data) => Some(data.claims.sub),
            Err(err) => {
                tracing::debug!(error = %err, "bearer token rejected");
                None
            }
        }
    }
}
