use uuid::Uuid;

use crate::{
    Result,
    models::{Message, MessageView, NewMessageInput, Sorting, now},
};

use super::{
    Store, WriteOp, keys,
    record::{Record, epoch_millis, optional},
};

const THREAD_ID: &str = "thread_id";
const SENDER_ID: &str = "sender_id";
const CONTENT: &str = "content";
const TYPE: &str = "type";
pub(super) const LIKES: &str = "likes";
pub(super) const CHILD_THREAD_ID: &str = "child_thread_id";
const CREATED_AT: &str = "created_at";

impl Store {
    pub async fn get_message(&self, id: Uuid) -> Result<Message> {
        let key = keys::message(id);
        let fields = self.get_hash(&key).await?;
        parse_message(id, &Record::new(&key, fields))
    }

    /// The message plus the size of its reply thread.
    pub async fn get_message_view(&self, id: Uuid) -> Result<MessageView> {
        let message = self.get_message(id).await?;
        let child_thread_messages_count = match message.child_thread_id {
            Some(child) => self.ranked_len(&keys::thread_messages(child, Sorting::Recent)).await?,
            None => 0,
        };

        Ok(MessageView {
            message,
            child_thread_messages_count,
        })
    }

    /// Appends a message to an existing thread.
    pub async fn set_message(&self, thread_id: Uuid, sender_id: &str, input: &NewMessageInput) -> Result<Message> {
        let message = new_message(thread_id, sender_id, input);

        let mut ops = message_ops(&message);
        ops.push(WriteOp::IncrementHashField {
            key: keys::thread(thread_id),
            field: super::threads::MESSAGES_COUNT.to_owned(),
            delta: 1,
        });
        self.write(&ops).await?;

        Ok(message)
    }

    /// Counts one like on the message and re-ranks it within its thread.
    pub async fn increment_message_likes(&self, thread_id: Uuid, message_id: Uuid) -> Result<()> {
        self.write(&[
            WriteOp::IncrementHashField {
                key: keys::message(message_id),
                field: LIKES.to_owned(),
                delta: 1,
            },
            WriteOp::IncrementScore {
                key: keys::thread_messages(thread_id, Sorting::Popularity),
                member: message_id.to_string(),
                delta: 1.0,
            },
        ])
        .await
    }
}

pub(super) fn new_message(thread_id: Uuid, sender_id: &str, input: &NewMessageInput) -> Message {
    Message {
        id: Uuid::now_v7(),
        thread_id,
        sender_id: sender_id.to_owned(),
        content: input.content.clone(),
        kind: input.kind,
        likes: 0,
        child_thread_id: None,
        created_at: now(),
    }
}

/// Record plus both thread orderings.
pub(super) fn message_ops(message: &Message) -> Vec<WriteOp> {
    let created_at = epoch_millis(message.created_at);
    vec![
        WriteOp::SetHash {
            key: keys::message(message.id),
            fields: vec![
                (THREAD_ID.to_owned(), message.thread_id.to_string()),
                (SENDER_ID.to_owned(), message.sender_id.clone()),
                (CONTENT.to_owned(), message.content.clone()),
                (TYPE.to_owned(), message.kind.as_str().to_owned()),
                (LIKES.to_owned(), message.likes.to_string()),
                (CHILD_THREAD_ID.to_owned(), optional(message.child_thread_id)),
                (CREATED_AT.to_owned(), created_at.to_string()),
            ],
        },
        WriteOp::AddRanked {
            key: keys::thread_messages(message.thread_id, Sorting::Recent),
            member: message.id.to_string(),
            score: created_at as f64,
        },
        WriteOp::AddRanked {
            key: keys::thread_messages(message.thread_id, Sorting::Popularity),
            member: message.id.to_string(),
            score: message.likes as f64,
        },
    ]
}

fn parse_message(id: Uuid, record: &Record<'_>) -> Result<Message> {
    Ok(Message {
        id,
        thread_id: record.parse(THREAD_ID)?,
        sender_id: record.string(SENDER_ID)?,
        content: record.string(CONTENT)?,
        kind: record.parse(TYPE)?,
        likes: record.parse(LIKES)?,
        child_thread_id: record.optional_uuid(CHILD_THREAD_ID)?,
        created_at: record.timestamp(CREATED_AT)?,
    })
}
