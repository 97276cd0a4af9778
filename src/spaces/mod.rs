mod like;
mod location;
mod msg;
mod space;
mod subscribers;
mod threads;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{AppState, Error, Result, db::Store, models::Thread};

pub use like::like_message;
pub use location::get_spaces_by_location;
pub use msg::{create_message, get_message};
pub use space::{create_space, get_space, get_spaces_by_user};
pub use subscribers::{add_space_subscriber, get_space_subscribers, is_space_subscriber};
pub use threads::{create_thread, create_top_level_thread, get_thread_with_messages, get_top_level_threads};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/spaces", get(space::spaces).post(space::new_space))
        .route("/spaces/{space_id}", get(space::space))
        .route(
            "/spaces/{space_id}/subscribers",
            get(subscribers::subscribers).post(subscribers::subscribe),
        )
        .route(
            "/spaces/{space_id}/toplevel-threads",
            get(threads::top_level_threads).post(threads::new_top_level_thread),
        )
        .route("/spaces/{space_id}/threads/{thread_id}", get(threads::thread))
        .route(
            "/spaces/{space_id}/threads/{thread_id}/messages",
            post(msg::new_message),
        )
        .route(
            "/spaces/{space_id}/threads/{thread_id}/messages/{message_id}",
            get(msg::message),
        )
        .route(
            "/spaces/{space_id}/threads/{thread_id}/messages/{message_id}/threads",
            post(threads::new_thread),
        )
        .route(
            "/spaces/{space_id}/threads/{thread_id}/messages/{message_id}/likes",
            post(like::like),
        )
        .route("/spaces/{space_id}/updates/ws", get(ws::space_updates))
}

/// The thread, provided it belongs to the space.
async fn thread_in_space(store: &Store, space_id: Uuid, thread_id: Uuid) -> Result<Thread> {
    let thread = store.get_thread(thread_id).await?;
    if thread.space_id != space_id {
        return Err(Error::NotFound(format!("thread {thread_id} in space {space_id}")));
    }
    Ok(thread)
}

/// For references in a request body or path that a write depends on.
fn invalid_if_missing(err: Error) -> Error {
    match err {
        Error::NotFound(what) => Error::Validation(format!("{what} does not exist")),
        err => err,
    }
}
