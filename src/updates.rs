use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Thread, TopLevelThread, UserId};

/// One live update pushed to the sessions of a space.
///
/// Serialises as `{"type": ..., "userId": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceUpdate {
    /// The user whose action produced the update.
    pub user_id: UserId,
    #[serde(flatten)]
    pub kind: SpaceUpdateKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SpaceUpdateKind {
    NewTopLevelThread {
        #[serde(rename = "newToplevelThread")]
        thread: TopLevelThread,
    },
    NewThread {
        #[serde(rename = "newThread")]
        thread: Thread,
    },
    NewMessage {
        #[serde(rename = "newMessage")]
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    NewSubscriber { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    NewActiveSubscriber { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    RemoveActiveSubscriber { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    TopLevelThreadPopularityIncrease { thread_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ThreadPopularityIncrease {
        thread_id: Uuid,
        parent_message_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    MessagePopularityIncrease { thread_id: Uuid, message_id: Uuid },
}

impl SpaceUpdate {
    pub fn new(user_id: impl Into<UserId>, kind: SpaceUpdateKind) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
        }
    }
}
