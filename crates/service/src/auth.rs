//! Registration, email verification and bearer-token authentication.

use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use model::{DomainEvent, NewUser, User};
use rand::Rng;
use rand::distributions::Alphanumeric;
use repository::{RepositoryError, TokensRepository, UsersRepository};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::audit::AuditLogger;
use crate::events::{self, EventPublisher};
use crate::ServiceError;

const VERIFICATION_TOKEN_LENGTH: usize = 64;
const TOKEN_SECRET_LENGTH: usize = 40;
const DEFAULT_TOKEN_NAME: &str = "auth_token";

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// A user together with a freshly issued plain-text bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

/// Result of resolving a bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    pub token_id: i64,
}

pub struct AuthService {
    users: Arc<dyn UsersRepository>,
    tokens: Arc<dyn TokensRepository>,
    audit: AuditLogger,
    events: Arc<dyn EventPublisher>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UsersRepository>,
        tokens: Arc<dyn TokensRepository>,
        audit: AuditLogger,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            users,
            tokens,
            audit,
            events,
        }
    }

    /// Creates an unverified account, schedules the welcome email and
    /// signs the user in.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: RegisterInput) -> Result<AuthSession, ServiceError> {
        let email = input.email.trim().to_string();
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyExists);
        }

        let new_user = NewUser {
            name: input.name.trim().to_string(),
            email,
            password_hash: hash_password(&input.password)?,
            verification_token: random_string(VERIFICATION_TOKEN_LENGTH),
        };
        let user = match self.users.create(&new_user).await {
            Ok(user) => user,
            Err(RepositoryError::UniqueViolation(_)) => return Err(ServiceError::EmailAlreadyExists),
            Err(err) => return Err(err.into()),
        };

        self.audit.created(&user).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::UserRegistered {
                user_id: user.id,
                name: user.name.clone(),
                email: user.email.clone(),
                verification_token: new_user.verification_token.clone(),
            },
        )
        .await;

        let token = self.issue_token(user.id).await?;
        info!(user_id = user.id, "User registered");
        Ok(AuthSession { user, token })
    }

    #[instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> Result<User, ServiceError> {
        let user = self
            .users
            .find_by_verification_token(token)
            .await?
            .ok_or(ServiceError::InvalidVerificationToken)?;

        let verified = self.users.mark_email_verified(user.id).await?;
        self.audit.updated(&user, &verified).await;
        info!(user_id = verified.id, "Email verified");
        Ok(verified)
    }

    #[instrument(skip(self))]
    pub async fn resend_verification(&self, email: &str) -> Result<(), ServiceError> {
        let user = self
            .users
            .find_by_email(email.trim())
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        if user.is_email_verified() {
            return Err(ServiceError::EmailAlreadyVerified);
        }

        let token = random_string(VERIFICATION_TOKEN_LENGTH);
        let user = self.users.set_verification_token(user.id, &token).await?;
        events::publish(
            self.events.as_ref(),
            DomainEvent::VerificationRequested {
                user_id: user.id,
                name: user.name.clone(),
                email: user.email.clone(),
                verification_token: token,
            },
        )
        .await;
        Ok(())
    }

    /// Checks the credentials without issuing a token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        let user = self
            .users
            .find_by_email(email.trim())
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            return Err(ServiceError::InvalidCredentials);
        }
        if !user.is_email_verified() {
            return Err(ServiceError::EmailNotVerified(user.email));
        }
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ServiceError> {
        let user = match self.authenticate(email, password).await {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "Login rejected");
                return Err(err);
            }
        };
        let token = self.issue_token(user.id).await?;
        info!(user_id = user.id, "User logged in");
        Ok(AuthSession { user, token })
    }

    /// Maps a `"{id}|{secret}"` bearer token to its user.
    pub async fn resolve(&self, bearer: &str) -> Result<Authenticated, ServiceError> {
        let (id, secret) = bearer
            .split_once('|')
            .ok_or(ServiceError::Unauthenticated)?;
        let token_id: i64 = id.parse().map_err(|_| ServiceError::Unauthenticated)?;

        let token = self
            .tokens
            .find(token_id)
            .await?
            .filter(|t| token_matches(&t.token_hash, secret))
            .ok_or(ServiceError::Unauthenticated)?;
        let user = self
            .users
            .find_by_id(token.user_id)
            .await?
            .ok_or(ServiceError::Unauthenticated)?;

        if let Err(err) = self.tokens.touch(token.id).await {
            warn!(token_id = token.id, error = %err, "Failed to record token usage");
        }
        Ok(Authenticated {
            user,
            token_id: token.id,
        })
    }

    pub async fn logout(&self, token_id: i64) -> Result<(), ServiceError> {
        self.tokens.delete(token_id).await?;
        Ok(())
    }

    pub async fn logout_all(&self, user_id: i64) -> Result<u64, ServiceError> {
        let revoked = self.tokens.delete_for_user(user_id).await?;
        info!(user_id, revoked, "Revoked all tokens");
        Ok(revoked)
    }

    async fn issue_token(&self, user_id: i64) -> Result<String, ServiceError> {
        let secret = random_string(TOKEN_SECRET_LENGTH);
        let token = self
            .tokens
            .create(user_id, DEFAULT_TOKEN_NAME, &hash_token(&secret))
            .await?;
        Ok(format!("{}|{}", token.id, secret))
    }
}

pub(crate) fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub(crate) fn hash_token(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Constant-time check of a presented secret against its stored hex digest.
fn token_matches(stored_hash: &str, secret: &str) -> bool {
    let Ok(stored) = hex::decode(stored_hash) else {
        return false;
    };
    let presented = Sha256::digest(secret.as_bytes());
    stored.as_slice().ct_eq(presented.as_slice()).into()
}

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::Unexpected(format!("Password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    fn input(email: &str) -> RegisterInput {
        RegisterInput {
            name: "Ayşe Yılmaz".into(),
            email: email.into(),
            password: "correct horse".into(),
        }
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-hash"));
    }

    #[test]
    fn test_token_matches_stored_digest() {
        let stored = hash_token("presented-secret");
        assert!(token_matches(&stored, "presented-secret"));
        assert!(!token_matches(&stored, "presented-secreT"));
        assert!(!token_matches(&stored[..32], "presented-secret"));
        assert!(!token_matches("not-hex", "presented-secret"));
    }

    #[tokio::test]
    async fn test_register_issues_token_and_publishes_event() {
        let h = Harness::new();
        let session = h.auth().register(input("ayse@example.com")).await.unwrap();

        let (id, secret) = session.token.split_once('|').unwrap();
        assert!(id.parse::<i64>().is_ok());
        assert_eq!(secret.len(), TOKEN_SECRET_LENGTH);
        assert!(!session.user.is_email_verified());

        let events = h.events.names();
        assert_eq!(events, vec!["user_registered"]);
        assert_eq!(h.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let h = Harness::new();
        h.auth().register(input("dup@example.com")).await.unwrap();
        let err = h.auth().register(input("dup@example.com")).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmailAlreadyExists));
    }

    #[tokio::test]
    async fn test_login_requires_verified_email() {
        let h = Harness::new();
        h.auth().register(input("new@example.com")).await.unwrap();

        let err = h.auth().login("new@example.com", "correct horse").await.unwrap_err();
        assert!(matches!(err, ServiceError::EmailNotVerified(ref e) if e == "new@example.com"));

        let err = h.auth().login("new@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_verify_then_login_and_resolve() {
        let h = Harness::new();
        h.auth().register(input("v@example.com")).await.unwrap();
        let token = h.users.verification_token_of("v@example.com").unwrap();

        let user = h.auth().verify_email(&token).await.unwrap();
        assert!(user.is_email_verified());
        assert!(matches!(
            h.auth().verify_email(&token).await,
            Err(ServiceError::InvalidVerificationToken)
        ));

        let session = h.auth().login("v@example.com", "correct horse").await.unwrap();
        let resolved = h.auth().resolve(&session.token).await.unwrap();
        assert_eq!(resolved.user.id, user.id);

        h.auth().logout(resolved.token_id).await.unwrap();
        assert!(matches!(
            h.auth().resolve(&session.token).await,
            Err(ServiceError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_resolve_rejects_tampered_tokens() {
        let h = Harness::new();
        let session = h.auth().register(input("t@example.com")).await.unwrap();
        let (id, _) = session.token.split_once('|').unwrap();

        for bad in [format!("{id}|wrong"), "garbage".to_string(), "x|y".to_string()] {
            assert!(matches!(
                h.auth().resolve(&bad).await,
                Err(ServiceError::Unauthenticated)
            ));
        }
    }

    #[tokio::test]
    async fn test_resend_verification() {
        let h = Harness::new();
        assert!(matches!(
            h.auth().resend_verification("ghost@example.com").await,
            Err(ServiceError::UserNotFound)
        ));

        h.auth().register(input("r@example.com")).await.unwrap();
        let before = h.users.verification_token_of("r@example.com");
        h.auth().resend_verification("r@example.com").await.unwrap();
        assert_ne!(h.users.verification_token_of("r@example.com"), before);
        assert_eq!(
            h.events.names(),
            vec!["user_registered", "verification_requested"]
        );

        let token = h.users.verification_token_of("r@example.com").unwrap();
        h.auth().verify_email(&token).await.unwrap();
        assert!(matches!(
            h.auth().resend_verification("r@example.com").await,
            Err(ServiceError::EmailAlreadyVerified)
        ));
    }

    #[tokio::test]
    async fn test_logout_all_revokes_every_token() {
        let h = Harness::new();
        let first = h.auth().register(input("m@example.com")).await.unwrap();
        let token = h.users.verification_token_of("m@example.com").unwrap();
        h.auth().verify_email(&token).await.unwrap();
        let second = h.auth().login("m@example.com", "correct horse").await.unwrap();

        assert_eq!(h.auth().logout_all(first.user.id).await.unwrap(), 2);
        assert!(h.auth().resolve(&second.token).await.is_err());
    }
}
