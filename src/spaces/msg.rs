use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use tracing::debug;
use uuid::Uuid;

use crate::{
    AppResult, AppState, Error, Result, data,
    db::Store,
    models::{Message, MessageView, NewMessageInput},
    registry::SessionRegistry,
    session::require_user,
    updates::{SpaceUpdate, SpaceUpdateKind},
};

use super::{invalid_if_missing, thread_in_space};

pub async fn create_message(
    store: &Store,
    registry: &SessionRegistry,
    space_id: Uuid,
    thread_id: Uuid,
    user_id: &str,
    input: NewMessageInput,
) -> Result<Message> {
    input.validate()?;
    thread_in_space(store, space_id, thread_id)
        .await
        .map_err(invalid_if_missing)?;

    let message = store.set_message(thread_id, user_id, &input).await?;
    debug!(%space_id, %thread_id, message_id = %message.id, "message created");

    registry.publish_to_space(
        space_id,
        SpaceUpdate::new(
            user_id,
            SpaceUpdateKind::NewMessage {
                message: message.clone(),
            },
        ),
    );
    Ok(message)
}

pub async fn get_message(store: &Store, space_id: Uuid, thread_id: Uuid, message_id: Uuid) -> Result<MessageView> {
    thread_in_space(store, space_id, thread_id).await?;
    let view = store.get_message_view(message_id).await?;
    if view.message.thread_id != thread_id {
        return Err(Error::NotFound(format!("message {message_id} in thread {thread_id}")));
    }
    Ok(view)
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_message(
    State(store): State<Store>,
    State(registry): State<SessionRegistry>,
    session: Session,
    Path((space_id, thread_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<NewMessageInput>,
) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    let message = create_message(&store, &registry, space_id, thread_id, &user_id, input).await?;

    Ok((StatusCode::CREATED, data(message)).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn message(
    State(store): State<Store>,
    Path((space_id, thread_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<Response> {
    Ok(data(get_message(&store, space_id, thread_id, message_id).await?).into_response())
}
