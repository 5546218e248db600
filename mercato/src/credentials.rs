use async_trait::async_trait;

use mercato_core::plugin::Credentials;

use crate::error::ServiceError;

/// Resolves venue credentials for an authenticated user.
///
/// Credential storage itself lives outside this service; deployments plug in
/// whatever backs their user accounts. The environment-backed default covers
/// single-tenant setups.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Credentials for `(user_id, provider)`, or `None` when the user has
    /// not linked the venue.
    async fn credentials_for(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<Credentials>, ServiceError>;
}

/// Reads `<PROVIDER>_API_KEY` / `<PROVIDER>_API_SECRET` /
/// `<PROVIDER>_API_PASSPHRASE` from the environment, ignoring the user id.
pub struct EnvCredentials;

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn credentials_for(
        &self,
        _user_id: &str,
        provider: &str,
    ) -> Result<Option<Credentials>, ServiceError> {
        let prefix = provider.to_uppercase().replace('-', "_");
        let key = std::env::var(format!("{prefix}_API_KEY")).ok();
        let secret = std::env::var(format!("{prefix}_API_SECRET")).ok();
        Ok(match (key, secret) {
            (Some(api_key), Some(api_secret)) => Some(Credentials {
                api_key,
                api_secret,
                passphrase: std::env::var(format!("{prefix}_API_PASSPHRASE")).ok(),
            }),
            _ => None,
        })
    }
}

/// A source with no credentials for anyone; anonymous-only deployments.
pub struct NoCredentials;

#[async_trait]
impl CredentialSource for NoCredentials {
    async fn credentials_for(
        &self,
        _user_id: &str,
        _provider: &str,
    ) -> Result<Option<Credentials>, ServiceError> {
        Ok(None)
    }
}
