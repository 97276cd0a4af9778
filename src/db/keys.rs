//! Key layout of the store.

use std::fmt::Display;

use uuid::Uuid;

use crate::models::Sorting;

pub const SPACE_COORDINATES: &str = "spaces:coordinates";

pub fn user(id: &str) -> String {
    format!("users:{id}")
}

pub fn user_spaces(id: &str) -> String {
    format!("users:{id}:spaces")
}

pub fn space(id: Uuid) -> String {
    format!("spaces:{id}")
}

pub fn space_subscribers(id: Uuid) -> String {
    format!("spaces:{id}:subscribers")
}

pub fn space_active_subscribers(id: Uuid) -> String {
    format!("spaces:{id}:active_subscribers")
}

/// Live sessions one user holds in one space.
pub fn active_sessions(space_id: Uuid, user_id: &str) -> String {
    format!("spaces:{space_id}:active_subscribers:{user_id}:sessions")
}

pub fn top_level_threads(space_id: Uuid, sorting: Sorting) -> String {
    format!("spaces:{space_id}:toplevel_threads:{}", suffix(sorting))
}

pub fn thread(id: Uuid) -> String {
    format!("threads:{id}")
}

pub fn thread_messages(thread_id: Uuid, sorting: Sorting) -> String {
    format!("threads:{thread_id}:messages:{}", suffix(sorting))
}

pub fn message(id: impl Display) -> String {
    format!("messages:{id}")
}

fn suffix(sorting: Sorting) -> &'static str {
    match sorting {
        Sorting::Recent => "by_time",
        Sorting::Popularity => "by_popularity",
    }
}
