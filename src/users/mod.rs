use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_sessions::Session;
use tracing::info;

use crate::{
    AppResult, AppState, Error, Result, data,
    db::Store,
    models::{NewUser, User},
    session::{USER_ID, require_user},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(sign_in))
        .route("/users/{user_id}", get(user))
        .route("/user", get(me))
}

pub async fn create_user(store: &Store, new_user: NewUser) -> Result<User> {
    if new_user.id.trim().is_empty() {
        return Err(Error::Validation("user id is empty".to_owned()));
    }

    let user = store.set_user(&new_user).await?;
    info!(user_id = %user.id, signed_up = user.is_signed_up, "user stored");
    Ok(user)
}

pub async fn get_user(store: &Store, user_id: &str) -> Result<User> {
    store.get_user(user_id).await
}

/// Stores the caller's profile and signs the session in as that user.
#[debug_handler(state = AppState)]
async fn sign_in(
    State(store): State<Store>,
    session: Session,
    Json(new_user): Json<NewUser>,
) -> AppResult<Response> {
    let user = create_user(&store, new_user).await?;
    session.insert(USER_ID, &user.id).await?;

    Ok((StatusCode::CREATED, data(user)).into_response())
}

#[debug_handler(state = AppState)]
async fn me(State(store): State<Store>, session: Session) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    Ok(data(get_user(&store, &user_id).await?).into_response())
}

#[debug_handler(state = AppState)]
async fn user(State(store): State<Store>, Path(user_id): Path<String>) -> AppResult<Response> {
    Ok(data(get_user(&store, &user_id).await?).into_response())
}
