use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::auth::{
    error::{AuthError, REQUIRED_FIELDS_MESSAGE},
    jwt::TokenKeys,
    password::{self, DUMMY_HASH},
    principal::{NewPrincipal, PrincipalKind, PublicPrincipal},
    repo::IdentityStore,
};

/// Raw registration fields as they arrived; any of them may be missing.
#[derive(Default)]
pub struct RegisterInput {
    pub identifier: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Default)]
pub struct LoginInput {
    pub identifier: Option<String>,
    pub password: Option<String>,
}

/// Registration and login rules for every principal kind. Holds the store
/// handle and signing keys; both are shared read-only across requests.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn IdentityStore>,
    tokens: Arc<TokenKeys>,
}

impl CredentialService {
    pub fn new(store: Arc<dyn IdentityStore>, tokens: TokenKeys) -> Self {
        Self {
            store,
            tokens: Arc::new(tokens),
        }
    }

    pub fn tokens(&self) -> &TokenKeys {
        &self.tokens
    }

    #[instrument(skip(self, input), fields(role = %kind))]
    pub async fn register(
        &self,
        kind: PrincipalKind,
        input: RegisterInput,
    ) -> Result<PublicPrincipal, AuthError> {
        let (Some(identifier), Some(name), Some(email), Some(password), Some(confirm)) = (
            text_field(input.identifier),
            text_field(input.name),
            text_field(input.email),
            secret_field(input.password),
            secret_field(input.confirm_password),
        ) else {
            return Err(AuthError::validation(REQUIRED_FIELDS_MESSAGE));
        };

        if password != confirm {
            warn!(%identifier, "password confirmation mismatch");
            return Err(AuthError::PasswordMismatch);
        }

        let password_hash = hash_off_thread(password).await?;

        // Uniqueness is decided by the insert itself; no lookup beforehand.
        let principal = match self
            .store
            .insert(
                kind,
                NewPrincipal {
                    identifier,
                    name,
                    email,
                    password_hash,
                },
            )
            .await
        {
            Ok(p) => p,
            Err(e) => {
                let err = AuthError::from(e);
                if matches!(err, AuthError::DuplicateIdentifier(_)) {
                    warn!("identifier already registered");
                }
                return Err(err);
            }
        };

        info!(identifier = %principal.identifier, "principal registered");
        Ok(PublicPrincipal::from_principal(kind, principal))
    }

    /// Returns a signed session token. Unknown identifier and wrong password
    /// produce the same error after the same amount of hashing work.
    #[instrument(skip(self, input), fields(role = %kind))]
    pub async fn login(&self, kind: PrincipalKind, input: LoginInput) -> Result<String, AuthError> {
        let (Some(identifier), Some(password)) =
            (text_field(input.identifier), secret_field(input.password))
        else {
            return Err(AuthError::validation(kind.login_required_message()));
        };

        let found = self.store.find_by_identifier(kind, &identifier).await?;

        let (stored_hash, principal) = match found {
            Some(p) => (p.password_hash.clone(), Some(p)),
            None => (DUMMY_HASH.to_string(), None),
        };
        let matched = verify_off_thread(password, stored_hash).await?;

        let principal = match principal {
            Some(p) if matched => p,
            Some(_) => {
                warn!(%identifier, "login rejected: wrong password");
                return Err(AuthError::InvalidCredentials(kind));
            }
            None => {
                warn!(%identifier, "login rejected: unknown identifier");
                return Err(AuthError::InvalidCredentials(kind));
            }
        };

        let token = self
            .tokens
            .sign(kind, &principal.identifier, &principal.name)
            .map_err(AuthError::unexpected)?;

        info!(identifier = %principal.identifier, "principal logged in");
        Ok(token)
    }
}

fn text_field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Passwords are compared byte-for-byte, so no trimming.
fn secret_field(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn hash_off_thread(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(AuthError::unexpected)?
        .map_err(AuthError::unexpected)
}

async fn verify_off_thread(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
        .await
        .map_err(AuthError::unexpected)?
        .map_err(AuthError::unexpected)
}
