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
    models::{NewMessageInput, Sorting, Thread, ThreadWithMessages, TopLevelThread},
    registry::SessionRegistry,
    session::require_user,
    updates::{SpaceUpdate, SpaceUpdateKind},
};

use super::{invalid_if_missing, thread_in_space};

pub async fn create_top_level_thread(
    store: &Store,
    registry: &SessionRegistry,
    space_id: Uuid,
    user_id: &str,
    first_message: NewMessageInput,
) -> Result<TopLevelThread> {
    first_message.validate()?;
    store.get_space(space_id).await?;

    let thread = store
        .set_top_level_thread(space_id, user_id, &first_message)
        .await?;
    info!(%space_id, thread_id = %thread.thread.id, %user_id, "top-level thread created");

    registry.publish_to_space(
        space_id,
        SpaceUpdate::new(
            user_id,
            SpaceUpdateKind::NewTopLevelThread {
                thread: thread.clone(),
            },
        ),
    );
    Ok(thread)
}

/// Opens a reply thread under a message. A message takes one reply thread at most.
pub async fn create_thread(
    store: &Store,
    registry: &SessionRegistry,
    space_id: Uuid,
    thread_id: Uuid,
    message_id: Uuid,
    user_id: &str,
) -> Result<Thread> {
    thread_in_space(store, space_id, thread_id)
        .await
        .map_err(invalid_if_missing)?;
    let parent = store
        .get_message(message_id)
        .await
        .map_err(invalid_if_missing)?;
    if parent.thread_id != thread_id {
        return Err(Error::Validation(format!(
            "message {message_id} is not in thread {thread_id}"
        )));
    }

    let thread = store.set_thread(space_id, message_id).await?;
    info!(%space_id, thread_id = %thread.id, parent_message_id = %message_id, "thread created");

    registry.publish_to_space(
        space_id,
        SpaceUpdate::new(
            user_id,
            SpaceUpdateKind::NewThread {
                thread: thread.clone(),
            },
        ),
    );
    Ok(thread)
}

pub async fn get_top_level_threads(
    store: &Store,
    space_id: Uuid,
    sorting: Sorting,
    offset: i64,
    count: i64,
) -> Result<Vec<TopLevelThread>> {
    store.get_space(space_id).await?;
    store
        .get_top_level_threads(space_id, sorting, offset, count)
        .await
}

pub async fn get_thread_with_messages(
    store: &Store,
    space_id: Uuid,
    thread_id: Uuid,
    sorting: Sorting,
    offset: i64,
    count: i64,
) -> Result<ThreadWithMessages> {
    let thread = thread_in_space(store, space_id, thread_id).await?;
    let messages = store
        .get_thread_messages(thread_id, sorting, offset, count)
        .await?;

    Ok(ThreadWithMessages { thread, messages })
}

#[derive(Debug, Deserialize)]
pub(crate) struct ThreadsQuery {
    #[serde(default)]
    sort: Sorting,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_count")]
    count: i64,
}

#[debug_handler(state = AppState)]
pub(crate) async fn top_level_threads(
    State(store): State<Store>,
    Path(space_id): Path<Uuid>,
    Query(query): Query<ThreadsQuery>,
) -> AppResult<Response> {
    let threads = get_top_level_threads(&store, space_id, query.sort, query.offset, query.count).await?;
    Ok(data(threads).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_top_level_thread(
    State(store): State<Store>,
    State(registry): State<SessionRegistry>,
    session: Session,
    Path(space_id): Path<Uuid>,
    Json(first_message): Json<NewMessageInput>,
) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    let thread = create_top_level_thread(&store, &registry, space_id, &user_id, first_message).await?;

    Ok((StatusCode::CREATED, data(thread)).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn thread(
    State(store): State<Store>,
    Path((space_id, thread_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ThreadsQuery>,
) -> AppResult<Response> {
    let thread = get_thread_with_messages(&store, space_id, thread_id, query.sort, query.offset, query.count).await?;
    Ok(data(thread).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_thread(
    State(store): State<Store>,
    State(registry): State<SessionRegistry>,
    session: Session,
    Path((space_id, thread_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<Response> {
    let user_id = require_user(&session).await?;
    let thread = create_thread(&store, &registry, space_id, thread_id, message_id, &user_id).await?;

    Ok((StatusCode::CREATED, data(thread)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{Location, NewSpace},
        spaces::create_message,
    };

    async fn space(store: &Store) -> Uuid {
        store
            .set_space(
                "admin",
                &NewSpace {
                    name: "Kiez".to_owned(),
                    theme_color_hexa_code: "#123456".to_owned(),
                    radius: 50.0,
                    location: Location::new(13.42, 52.55),
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn top_level_thread_owns_its_first_message() {
        let store = Store::in_memory().await.unwrap();
        let registry = SessionRegistry::new();
        let space_id = space(&store).await;

        let created = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("hi"))
            .await
            .unwrap();
        assert_eq!(created.thread.messages_count, 1);
        assert_eq!(created.thread.first_message_id, Some(created.first_message.id));
        assert_eq!(created.first_message.thread_id, created.thread.id);

        let listed = get_top_level_threads(&store, space_id, Sorting::Recent, 0, 10).await.unwrap();
        assert_eq!(listed, [created.clone()]);

        let full = get_thread_with_messages(&store, space_id, created.thread.id, Sorting::Recent, 0, 10)
            .await
            .unwrap();
        assert_eq!(full.messages.len(), 1);
        assert_eq!(full.messages[0].message, created.first_message);
    }

    #[tokio::test]
    async fn message_takes_one_reply_thread() {
        let store = Store::in_memory().await.unwrap();
        let registry = SessionRegistry::new();
        let space_id = space(&store).await;
        let top = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("hi"))
            .await
            .unwrap();
        let (thread_id, message_id) = (top.thread.id, top.first_message.id);

        let reply = create_thread(&store, &registry, space_id, thread_id, message_id, "bob")
            .await
            .unwrap();
        assert_eq!(reply.parent_message_id, Some(message_id));
        assert!(!reply.is_top_level());

        let again = create_thread(&store, &registry, space_id, thread_id, message_id, "cyd").await;
        assert!(matches!(again, Err(Error::Validation(_))));

        create_message(&store, &registry, space_id, reply.id, "bob", NewMessageInput::text("re"))
            .await
            .unwrap();
        let full = get_thread_with_messages(&store, space_id, thread_id, Sorting::Recent, 0, 10)
            .await
            .unwrap();
        assert_eq!(full.messages[0].message.child_thread_id, Some(reply.id));
        assert_eq!(full.messages[0].child_thread_messages_count, 1);
    }

    #[tokio::test]
    async fn racing_reply_threads_have_one_winner() {
        let store = Store::in_memory().await.unwrap();
        let registry = SessionRegistry::new();
        let space_id = space(&store).await;
        let top = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("hi"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            create_thread(&store, &registry, space_id, top.thread.id, top.first_message.id, "bob"),
            create_thread(&store, &registry, space_id, top.thread.id, top.first_message.id, "cyd"),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn references_must_line_up() {
        let store = Store::in_memory().await.unwrap();
        let registry = SessionRegistry::new();
        let space_id = space(&store).await;
        let other_space = space(&store).await;
        let top = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("hi"))
            .await
            .unwrap();

        let wrong_space = create_thread(&store, &registry, other_space, top.thread.id, top.first_message.id, "bob").await;
        assert!(matches!(wrong_space, Err(Error::Validation(_))));

        let missing = create_thread(&store, &registry, space_id, top.thread.id, Uuid::now_v7(), "bob").await;
        assert!(matches!(missing, Err(Error::Validation(_))));

        let elsewhere = get_thread_with_messages(&store, other_space, top.thread.id, Sorting::Recent, 0, 10).await;
        assert!(matches!(elsewhere, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn popularity_ordering() {
        let store = Store::in_memory().await.unwrap();
        let registry = SessionRegistry::new();
        let space_id = space(&store).await;

        let first = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("one"))
            .await
            .unwrap();
        let second = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("two"))
            .await
            .unwrap();

        let recent = get_top_level_threads(&store, space_id, Sorting::Recent, 0, 10).await.unwrap();
        assert_eq!(recent[0].thread.id, second.thread.id);

        store
            .increment_top_level_thread_likes(space_id, first.thread.id)
            .await
            .unwrap();
        let popular = get_top_level_threads(&store, space_id, Sorting::Popularity, 0, 10).await.unwrap();
        assert_eq!(popular[0].thread.id, first.thread.id);
        assert_eq!(popular[0].thread.likes, 1);
    }
}
