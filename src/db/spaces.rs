use uuid::Uuid;

use crate::{
    Result,
    models::{NewSpace, Space, User, UserId, now},
};

use super::{
    Store, WriteOp, keys,
    record::{Record, epoch_millis},
};

const NAME: &str = "name";
const RADIUS: &str = "radius";
const LOCATION: &str = "location";
const THEME_COLOR: &str = "theme_color_hexa_code";
const CREATED_AT: &str = "created_at";
const ADMIN_ID: &str = "admin_id";

impl Store {
    pub async fn get_space(&self, id: Uuid) -> Result<Space> {
        let key = keys::space(id);
        let fields = self.get_hash(&key).await?;
        parse_space(id, &Record::new(&key, fields))
    }

    pub async fn get_spaces(&self, ids: &[Uuid]) -> Result<Vec<Space>> {
        let mut spaces = Vec::with_capacity(ids.len());
        for id in ids {
            spaces.push(self.get_space(*id).await?);
        }
        Ok(spaces)
    }

    /// Stores the record and indexes its centre in one write.
    pub async fn set_space(&self, admin_id: &str, new_space: &NewSpace) -> Result<Space> {
        let space = Space {
            id: Uuid::now_v7(),
            name: new_space.name.clone(),
            theme_color_hexa_code: new_space.theme_color_hexa_code.clone(),
            radius: new_space.radius,
            location: new_space.location,
            admin_id: admin_id.to_owned(),
            created_at: now(),
        };

        self.write(&[
            WriteOp::SetHash {
                key: keys::space(space.id),
                fields: vec![
                    (NAME.to_owned(), space.name.clone()),
                    (RADIUS.to_owned(), space.radius.to_string()),
                    (LOCATION.to_owned(), space.location.to_string()),
                    (THEME_COLOR.to_owned(), space.theme_color_hexa_code.clone()),
                    (CREATED_AT.to_owned(), epoch_millis(space.created_at).to_string()),
                    (ADMIN_ID.to_owned(), space.admin_id.clone()),
                ],
            },
            WriteOp::GeoAdd {
                key: keys::SPACE_COORDINATES.to_owned(),
                member: space.id.to_string(),
                location: space.location,
            },
        ])
        .await?;

        Ok(space)
    }

    /// Spaces the user subscribed to, newest subscription first.
    pub async fn get_spaces_by_user(&self, user_id: &str, offset: i64, count: i64) -> Result<Vec<Space>> {
        let ids = self.get_ranked(&keys::user_spaces(user_id), offset, count).await?;
        let ids = parse_ids(&keys::user_spaces(user_id), &ids)?;
        self.get_spaces(&ids).await
    }

    pub async fn set_space_subscriber(&self, space_id: Uuid, user_id: &str) -> Result<()> {
        let score = epoch_millis(now()) as f64;
        self.write(&[
            WriteOp::AddRanked {
                key: keys::space_subscribers(space_id),
                member: user_id.to_owned(),
                score,
            },
            WriteOp::AddRanked {
                key: keys::user_spaces(user_id),
                member: space_id.to_string(),
                score,
            },
        ])
        .await
    }

    pub async fn has_space_subscriber(&self, space_id: Uuid, user_id: &str) -> Result<bool> {
        let score = self.ranked_score(&keys::space_subscribers(space_id), user_id).await?;
        Ok(score.is_some())
    }

    pub async fn get_space_subscribers(
        &self,
        space_id: Uuid,
        active: bool,
        offset: i64,
        count: i64,
    ) -> Result<Vec<User>> {
        let key = if active {
            keys::space_active_subscribers(space_id)
        } else {
            keys::space_subscribers(space_id)
        };

        let ids: Vec<UserId> = self.get_ranked(&key, offset, count).await?;
        let mut users = Vec::with_capacity(ids.len());
        for id in &ids {
            users.push(self.get_user_or_unknown(id).await?);
        }
        Ok(users)
    }
}

pub(super) fn parse_ids(key: &str, raw: &[String]) -> Result<Vec<Uuid>> {
    raw.iter()
        .map(|id| {
            id.parse()
                .map_err(|_| crate::Error::corrupt(key, format!("{id} is not an id")))
        })
        .collect()
}

fn parse_space(id: Uuid, record: &Record<'_>) -> Result<Space> {
    Ok(Space {
        id,
        name: record.string(NAME)?,
        theme_color_hexa_code: record.string(THEME_COLOR)?,
        radius: record.parse(RADIUS)?,
        location: record.parse(LOCATION)?,
        admin_id: record.string(ADMIN_ID)?,
        created_at: record.timestamp(CREATED_AT)?,
    })
}
