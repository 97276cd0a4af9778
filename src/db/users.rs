use crate::{
    Error, Result,
    models::{NewUser, User},
};

use super::{Store, WriteOp, keys, record::Record};

const USERNAME: &str = "username";
const FIRST_NAME: &str = "first_name";
const LAST_NAME: &str = "last_name";
const AVATAR_URL: &str = "avatar_url";

impl Store {
    pub async fn get_user(&self, id: &str) -> Result<User> {
        let key = keys::user(id);
        let fields = self.get_hash(&key).await?;
        Ok(parse_user(id, &Record::new(&key, fields)))
    }

    /// Like `get_user`, but a missing profile yields an empty user.
    pub async fn get_user_or_unknown(&self, id: &str) -> Result<User> {
        match self.get_user(id).await {
            Err(Error::NotFound(_)) => Ok(User::unknown(id.to_owned())),
            other => other,
        }
    }

    pub async fn set_user(&self, user: &NewUser) -> Result<User> {
        self.write(&[WriteOp::SetHash {
            key: keys::user(&user.id),
            fields: vec![
                (USERNAME.to_owned(), user.username.clone()),
                (FIRST_NAME.to_owned(), user.first_name.clone()),
                (LAST_NAME.to_owned(), user.last_name.clone()),
                (AVATAR_URL.to_owned(), user.avatar_url.clone()),
            ],
        }])
        .await?;

        Ok(User::new(
            user.id.clone(),
            user.username.clone(),
            user.first_name.clone(),
            user.last_name.clone(),
            user.avatar_url.clone(),
        ))
    }

    pub async fn has_user(&self, id: &str) -> Result<bool> {
        match self.get_hash(&keys::user(id)).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn parse_user(id: &str, record: &Record<'_>) -> User {
    User::new(
        id.to_owned(),
        record.string_or_default(USERNAME),
        record.string_or_default(FIRST_NAME),
        record.string_or_default(LAST_NAME),
        record.string_or_default(AVATAR_URL),
    )
}
