use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::utils::{hash_password, verify_password};

pub const NAME_LEN: std::ops::RangeInclusive<usize> = 2..=32;
// bcrypt 只处理前 72 字节
pub const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=72;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
    pub expires_at: i64,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let name_len = self.name.trim().chars().count();
        if !NAME_LEN.contains(&name_len) {
            return Err(AppError::Validation(format!(
                "name must be between {} and {} characters",
                NAME_LEN.start(),
                NAME_LEN.end()
            )));
        }
        if !PASSWORD_LEN.contains(&self.password.len()) {
            return Err(AppError::Validation(format!(
                "password must be between {} and {} bytes",
                PASSWORD_LEN.start(),
                PASSWORD_LEN.end()
            )));
        }
        Ok(())
    }
}

impl User {
    pub async fn create(pool: &PgPool, req: RegisterRequest) -> Result<Self, AppError> {
        let password_hash = hash_password(&req.password)?;

        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING user_id, name, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.name.trim())
        .bind(password_hash)
        .fetch_one(pool)
        .await;

        match result {
            Ok(user) => {
                tracing::info!("Registered user {}", user.user_id);
                Ok(user)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::Conflict("user name already taken".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, name, password_hash, created_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, name, password_hash, created_at
            FROM users
            WHERE name = $1
            "#,
        )
        .bind(name.trim())
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub fn verify_login(&self, password: &str) -> Result<bool, AppError> {
        Ok(verify_password(password, &self.password_hash)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_register_validation() {
        assert!(request("alice", "secret1").validate().is_ok());
        assert!(request("圣诞", "secret1").validate().is_ok());
        assert!(matches!(
            request(" a ", "secret1").validate(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            request("alice", "short").validate(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            request("alice", &"x".repeat(73)).validate(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            user_id: Uuid::new_v4(),
            name: "alice".into(),
            password_hash: "$2b$12$hash".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["name"], "alice");
    }
}
