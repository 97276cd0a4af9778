use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;
use uuid::Uuid;

use crate::{
    AppResult, AppState, Result, data,
    db::Store,
    default_count,
    models::{User, UserId},
    registry::SessionRegistry,
    session::require_user,
    updates::{SpaceUpdate, SpaceUpdateKind},
};

pub async fn add_space_subscriber(
    store: &Store,
    registry: &SessionRegistry,
    space_id: Uuid,
    user_id: &str,
) -> Result<()> {
    store.get_space(space_id).await?;
    store.set_space_subscriber(space_id, user_id).await?;
    info!(%space_id, %user_id, "subscribed");

    registry.publish_to_space(
        space_id,
        SpaceUpdate::new(
            user_id,
            SpaceUpdateKind::NewSubscriber {
                user_id: user_id.to_owned(),
            },
        ),
    );
    Ok(())
}

pub async fn is_space_subscriber(store: &Store, space_id: Uuid, user_id: &str) -> Result<bool> {
    store.has_space_subscriber(space_id, user_id).await
}

/// All subscribers, or with `active` only those currently connected.
pub async fn get_space_subscribers(
    store: &Store,
    space_id: Uuid,
    active: bool,
    offset: i64,
    count: i64,
) -> Result<Vec<User>> {
    store.get_space(space_id).await?;
    store.get_space_subscribers(space_id, active, offset, count).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubscribersQuery {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_count")]
    count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Subscription {
    space_id: Uuid,
    user_id: UserId,
}

#[debug_handler(state = AppState)]
pub(crate) async fn subscribers(
    State(store): State<Store>,
    Path(space_id): Path<Uuid>,
    Query(query): Query<SubscribersQuery>,
) -> AppResult<Response> {
    let users = get_space_subscribers(&store, space_id, query.active, query.offset, query.count).await?;
    Ok(data(users).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn subscribe(
    State(store): State<Store>,
    State(registry): State<SessionRegistry>,
    session: Session,
    Path(space_id): Path<Uuid>,
) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    add_space_subscriber(&store, &registry, space_id, &user_id).await?;

    Ok((StatusCode::CREATED, data(Subscription { space_id, user_id })).into_response())
}
