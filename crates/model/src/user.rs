use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered customer account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    pub verification_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// Insert payload for a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub verification_token: String,
}

/// A personal bearer token. Only the SHA-256 of the secret is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub token_hash: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_not_serialized() {
        let now = Utc::now();
        let user = User {
            id: 1,
            name: "Ayşe".into(),
            email: "ayse@example.com".into(),
            password_hash: "$argon2id$...".into(),
            email_verified_at: None,
            verification_token: Some("abc".into()),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("verification_token").is_none());
        assert_eq!(json["email"], "ayse@example.com");
        assert!(!user.is_email_verified());
    }
}
