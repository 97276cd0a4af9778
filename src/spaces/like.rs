//! Likes travel from a message up through every thread above it.

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
};
use tower_sessions::Session;
use tracing::debug;
use uuid::Uuid;

use crate::{
    AppResult, AppState, Error, Result,
    db::Store,
    registry::SessionRegistry,
    session::require_user,
    updates::{SpaceUpdate, SpaceUpdateKind},
};

use super::{invalid_if_missing, thread_in_space};

/// Counts one like on the message and on each thread up to the top-level one.
///
/// Each tier is written on its own; a store failure part-way leaves the lower
/// tiers counted.
pub async fn like_message(
    store: &Store,
    registry: &SessionRegistry,
    space_id: Uuid,
    thread_id: Uuid,
    message_id: Uuid,
    user_id: &str,
) -> Result<()> {
    let mut thread = thread_in_space(store, space_id, thread_id)
        .await
        .map_err(invalid_if_missing)?;
    let message = store
        .get_message(message_id)
        .await
        .map_err(invalid_if_missing)?;
    if message.thread_id != thread_id {
        return Err(Error::Validation(format!(
            "message {message_id} is not in thread {thread_id}"
        )));
    }

    store.increment_message_likes(thread_id, message_id).await?;
    registry.publish_to_space(
        space_id,
        SpaceUpdate::new(
            user_id,
            SpaceUpdateKind::MessagePopularityIncrease {
                thread_id,
                message_id,
            },
        ),
    );

    loop {
        let Some(parent_message_id) = thread.parent_message_id else {
            store
                .increment_top_level_thread_likes(thread.space_id, thread.id)
                .await?;
            registry.publish_to_space(
                space_id,
                SpaceUpdate::new(
                    user_id,
                    SpaceUpdateKind::TopLevelThreadPopularityIncrease { thread_id: thread.id },
                ),
            );
            debug!(%space_id, %message_id, top_level_thread_id = %thread.id, "like propagated");
            return Ok(());
        };

        store.increment_thread_likes(thread.id).await?;
        registry.publish_to_space(
            space_id,
            SpaceUpdate::new(
                user_id,
                SpaceUpdateKind::ThreadPopularityIncrease {
                    thread_id: thread.id,
                    parent_message_id,
                },
            ),
        );

        let parent = store.get_message(parent_message_id).await?;
        thread = store.get_thread(parent.thread_id).await?;
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn like(
    State(store): State<Store>,
    State(registry): State<SessionRegistry>,
    session: Session,
    Path((space_id, thread_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let user_id = require_user(&session).await?;
    like_message(&store, &registry, space_id, thread_id, message_id, &user_id).await?;

    Ok(StatusCode::CREATED)
}
