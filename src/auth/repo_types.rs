use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record as stored. The hash and reset-token fields never leave
/// the server; clients only ever see the `UserResponse` projection.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub profile_image: Option<String>,
    pub created_at: OffsetDateTime,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<OffsetDateTime>,
}

/// Fields the caller supplies on registration; everything else is
/// generated by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}
