use tower_sessions::Session;

use crate::{AppResult, Error, models::UserId};

pub const USER_ID: &str = "user_id";

/// The signed-in user, or `Unauthorized`.
pub async fn require_user(session: &Session) -> AppResult<UserId> {
    match session.get::<UserId>(USER_ID).await? {
        Some(user_id) => Ok(user_id),
        None => Err(Error::Unauthorized.into()),
    }
}
