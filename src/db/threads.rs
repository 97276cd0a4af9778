use uuid::Uuid;

use crate::{
    Error, Result,
    models::{MessageView, NewMessageInput, Sorting, Thread, TopLevelThread, now},
};

use super::{
    Store, WriteOp, keys,
    messages::{CHILD_THREAD_ID, message_ops, new_message},
    record::{Record, epoch_millis, optional},
    spaces::parse_ids,
};

const SPACE_ID: &str = "space_id";
const PARENT_MESSAGE_ID: &str = "parent_message_id";
const FIRST_MESSAGE_ID: &str = "first_message_id";
const LIKES: &str = "likes";
pub(super) const MESSAGES_COUNT: &str = "messages_count";
const CREATED_AT: &str = "created_at";

/// Attempts at claiming a message's reply slot before giving up.
const CLAIM_ATTEMPTS: usize = 10;

impl Store {
    pub async fn get_thread(&self, id: Uuid) -> Result<Thread> {
        let key = keys::thread(id);
        let fields = self.get_hash(&key).await?;
        parse_thread(id, &Record::new(&key, fields))
    }

    pub async fn get_top_level_thread(&self, id: Uuid) -> Result<TopLevelThread> {
        let thread = self.get_thread(id).await?;
        let Some(first_message_id) = thread.first_message_id else {
            return Err(Error::corrupt(&keys::thread(id), "top-level thread without first message"));
        };
        let first_message = self.get_message(first_message_id).await?;

        Ok(TopLevelThread { thread, first_message })
    }

    /// Creates the thread, its first message and ranks both in one write.
    pub async fn set_top_level_thread(
        &self,
        space_id: Uuid,
        sender_id: &str,
        input: &NewMessageInput,
    ) -> Result<TopLevelThread> {
        let thread_id = Uuid::now_v7();
        let first_message = new_message(thread_id, sender_id, input);
        let thread = Thread {
            id: thread_id,
            space_id,
            parent_message_id: None,
            first_message_id: Some(first_message.id),
            likes: 0,
            messages_count: 1,
            created_at: first_message.created_at,
        };

        let mut ops = vec![thread_op(&thread)];
        ops.extend(message_ops(&first_message));
        ops.push(WriteOp::AddRanked {
            key: keys::top_level_threads(space_id, Sorting::Recent),
            member: thread_id.to_string(),
            score: epoch_millis(thread.created_at) as f64,
        });
        ops.push(WriteOp::AddRanked {
            key: keys::top_level_threads(space_id, Sorting::Popularity),
            member: thread_id.to_string(),
            score: 0.0,
        });
        self.write(&ops).await?;

        Ok(TopLevelThread { thread, first_message })
    }

    /// Creates a reply thread under `parent_message_id`.
    ///
    /// The message's reply slot is claimed under a watch, so of two racing
    /// calls exactly one wins and the other sees `Validation`.
    pub async fn set_thread(&self, space_id: Uuid, parent_message_id: Uuid) -> Result<Thread> {
        let thread = Thread {
            id: Uuid::now_v7(),
            space_id,
            parent_message_id: Some(parent_message_id),
            first_message_id: None,
            likes: 0,
            messages_count: 0,
            created_at: now(),
        };
        let message_key = keys::message(parent_message_id);

        self.compare_and_act::<Error, _, _>(&[message_key.clone()], CLAIM_ATTEMPTS, || {
            let thread = &thread;
            let message_key = &message_key;
            async move {
                let parent = self.get_message(parent_message_id).await?;
                if let Some(existing) = parent.child_thread_id {
                    return Err(Error::Validation(format!(
                        "message {parent_message_id} already has thread {existing}"
                    )));
                }

                Ok(Some(vec![
                    thread_op(thread),
                    WriteOp::SetHash {
                        key: message_key.clone(),
                        fields: vec![(CHILD_THREAD_ID.to_owned(), thread.id.to_string())],
                    },
                ]))
            }
        })
        .await?;

        Ok(thread)
    }

    pub async fn get_top_level_threads(
        &self,
        space_id: Uuid,
        sorting: Sorting,
        offset: i64,
        count: i64,
    ) -> Result<Vec<TopLevelThread>> {
        let key = keys::top_level_threads(space_id, sorting);
        let ids = parse_ids(&key, &self.get_ranked(&key, offset, count).await?)?;

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            threads.push(self.get_top_level_thread(id).await?);
        }
        Ok(threads)
    }

    pub async fn get_thread_messages(
        &self,
        thread_id: Uuid,
        sorting: Sorting,
        offset: i64,
        count: i64,
    ) -> Result<Vec<MessageView>> {
        let key = keys::thread_messages(thread_id, sorting);
        let ids = parse_ids(&key, &self.get_ranked(&key, offset, count).await?)?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            messages.push(self.get_message_view(id).await?);
        }
        Ok(messages)
    }

    /// Counts one like on a top-level thread and re-ranks it in its space.
    pub async fn increment_top_level_thread_likes(&self, space_id: Uuid, thread_id: Uuid) -> Result<()> {
        self.write(&[
            WriteOp::IncrementHashField {
                key: keys::thread(thread_id),
                field: LIKES.to_owned(),
                delta: 1,
            },
            WriteOp::IncrementScore {
                key: keys::top_level_threads(space_id, Sorting::Popularity),
                member: thread_id.to_string(),
                delta: 1.0,
            },
        ])
        .await
    }

    pub async fn increment_thread_likes(&self, thread_id: Uuid) -> Result<()> {
        self.increment_hash_field(&keys::thread(thread_id), LIKES, 1).await
    }
}

fn thread_op(thread: &Thread) -> WriteOp {
    WriteOp::SetHash {
        key: keys::thread(thread.id),
        fields: vec![
            (SPACE_ID.to_owned(), thread.space_id.to_string()),
            (PARENT_MESSAGE_ID.to_owned(), optional(thread.parent_message_id)),
            (FIRST_MESSAGE_ID.to_owned(), optional(thread.first_message_id)),
            (LIKES.to_owned(), thread.likes.to_string()),
            (MESSAGES_COUNT.to_owned(), thread.messages_count.to_string()),
            (CREATED_AT.to_owned(), epoch_millis(thread.created_at).to_string()),
        ],
    }
}

fn parse_thread(id: Uuid, record: &Record<'_>) -> Result<Thread> {
    Ok(Thread {
        id,
        space_id: record.parse(SPACE_ID)?,
        parent_message_id: record.optional_uuid(PARENT_MESSAGE_ID)?,
        first_message_id: record.optional_uuid(FIRST_MESSAGE_ID)?,
        likes: record.parse(LIKES)?,
        messages_count: record.parse(MESSAGES_COUNT)?,
        created_at: record.timestamp(CREATED_AT)?,
    })
}
