use axum::{
    debug_handler,
    extract::{Path, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppResult, AppState, Error, db::Store, live::LiveUpdates, session::require_user};

use super::is_space_subscriber;

/// Live updates of one space, for its subscribers.
#[debug_handler(state = AppState)]
pub(crate) async fn space_updates(
    Path(space_id): Path<Uuid>,
    State(store): State<Store>,
    State(live): State<LiveUpdates>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    store.get_space(space_id).await?;
    if !is_space_subscriber(&store, space_id, &user_id).await? {
        return Err(Error::Forbidden(format!("{user_id} is not subscribed to {space_id}")).into());
    }

    Ok(ws
        .on_upgrade(move |socket| live.serve(socket, space_id, user_id))
        .into_response())
}
