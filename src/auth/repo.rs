use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique-index violation; the field is `"email"` or `"username"`.
    #[error("{0} already taken")]
    Duplicate(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Single-document operations over user records. Handlers only ever see
/// this trait; the concrete backend is injected at composition time.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Only matches a token that has not passed its expiry instant;
    /// an expired token behaves exactly like a missing one.
    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Inserts a new user. Uniqueness of email and username is enforced
    /// here (unique index), not by the caller's pre-checks.
    async fn insert(&self, new: NewUser) -> Result<User, StoreError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Replaces the hash and clears the reset token in one update so no
    /// partial write is ever observable.
    async fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
}

const USER_COLUMNS: &str =
    "id, email, username, password_hash, profile_image, created_at, reset_token, reset_token_expiry";

/// Postgres-backed store. The `users` table carries unique constraints
/// on email and username (see migrations), so a concurrent duplicate
/// insert loses cleanly instead of racing a check-then-insert.
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn other(err: sqlx::Error) -> StoreError {
    StoreError::Other(err.into())
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(other)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(other)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(other)
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE reset_token = $1 AND reset_token_expiry > now()"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .map_err(other)
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let result = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, username, password_hash)
             VALUES ($1, $2, $3)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new.email)
        .bind(&new.username)
        .bind(&new.password_hash)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                let field = if db_err.message().contains("username") {
                    "username"
                } else {
                    "email"
                };
                Err(StoreError::Duplicate(field))
            }
            Err(err) => Err(other(err)),
        }
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .map_err(other)?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET reset_token = $2, reset_token_expiry = $3 WHERE id = $1")
            .bind(id)
            .bind(token)
            .bind(expires_at)
            .execute(&self.db)
            .await
            .map_err(other)?;
        Ok(())
    }

    async fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users
             SET password_hash = $2, reset_token = NULL, reset_token_expiry = NULL
             WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .map_err(other)?;
        Ok(())
    }
}

/// In-memory store used by `AppState::fake()` and the handler tests.
#[derive(Default)]
pub struct MemStore {
    users: Mutex<Vec<User>>,
}

impl MemStore {
    async fn update<F>(&self, id: Uuid, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.lock().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no user with id {id}")))?;
        apply(user);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let users = self.users.lock().await;
        Ok(users
            .iter()
            .find(|u| {
                u.reset_token.as_deref() == Some(token)
                    && u.reset_token_expiry.map(|exp| exp > now).unwrap_or(false)
            })
            .cloned())
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::Duplicate("email"));
        }
        if users.iter().any(|u| u.username == new.username) {
            return Err(StoreError::Duplicate("username"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            profile_image: None,
            created_at: OffsetDateTime::now_utc(),
            reset_token: None,
            reset_token_expiry: None,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let hash = password_hash.to_string();
        self.update(id, |u| u.password_hash = hash).await
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let token = token.to_string();
        self.update(id, |u| {
            u.reset_token = Some(token);
            u.reset_token_expiry = Some(expires_at);
        })
        .await
    }

    async fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let hash = password_hash.to_string();
        self.update(id, |u| {
            u.password_hash = hash;
            u.reset_token = None;
            u.reset_token_expiry = None;
        })
        .await
    }
}
