use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;
use uuid::Uuid;

use crate::{
    AppResult, AppState, Error, Result, data,
    db::Store,
    default_count,
    models::{Location, NewSpace, Space},
    session::require_user,
};

use super::location::get_spaces_by_location;

pub async fn create_space(store: &Store, admin_id: &str, new_space: NewSpace) -> Result<Space> {
    new_space.validate()?;
    if !store.has_user(admin_id).await? {
        return Err(Error::NotFound(format!("user {admin_id}")));
    }

    let space = store.set_space(admin_id, &new_space).await?;
    info!(space_id = %space.id, %admin_id, name = %space.name, "space created");
    Ok(space)
}

pub async fn get_space(store: &Store, space_id: Uuid) -> Result<Space> {
    store.get_space(space_id).await
}

/// Spaces the user subscribed to, newest subscription first.
pub async fn get_spaces_by_user(store: &Store, user_id: &str, offset: i64, count: i64) -> Result<Vec<Space>> {
    if !store.has_user(user_id).await? {
        return Err(Error::NotFound(format!("user {user_id}")));
    }
    store.get_spaces_by_user(user_id, offset, count).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct SpacesQuery {
    location: Option<String>,
    radius: Option<f64>,
    user_id: Option<String>,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_count")]
    count: i64,
}

#[debug_handler(state = AppState)]
pub(crate) async fn spaces(
    State(store): State<Store>,
    Query(query): Query<SpacesQuery>,
) -> AppResult<Response> {
    if let Some(user_id) = query.user_id {
        let spaces = get_spaces_by_user(&store, &user_id, query.offset, query.count).await?;
        return Ok(data(spaces).into_response());
    }

    let (Some(location), Some(radius)) = (query.location, query.radius) else {
        return Err(Error::Validation("either user_id or location and radius are required".to_owned()).into());
    };
    let location: Location = location.parse()?;
    let spaces = get_spaces_by_location(&store, location, radius, query.offset, query.count).await?;

    Ok(data(spaces).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_space(
    State(store): State<Store>,
    session: Session,
    Json(new_space): Json<NewSpace>,
) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    let space = create_space(&store, &user_id, new_space).await?;

    Ok((StatusCode::CREATED, data(space)).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn space(
    State(store): State<Store>,
    Path(space_id): Path<Uuid>,
) -> AppResult<Response> {
    Ok(data(get_space(&store, space_id).await?).into_response())
}
