use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

pub type UserId = String;

/// Upper bound on a space's radius in metres.
pub const MAX_SPACE_RADIUS: f64 = 100.0;

// geo index limits, same as the web-mercator bounds of the store
const MAX_LATITUDE: f64 = 85.05112878;
const MAX_LONGITUDE: f64 = 180.0;

/// Current time truncated to what the store keeps.
pub(crate) fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_millisecond(now.millisecond()).unwrap_or(now)
}

pub(crate) fn from_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

impl Location {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-MAX_LONGITUDE..=MAX_LONGITUDE).contains(&self.longitude) {
            return Err(Error::Validation(format!("longitude {} out of range", self.longitude)));
        }
        if !(-MAX_LATITUDE..=MAX_LATITUDE).contains(&self.latitude) {
            return Err(Error::Validation(format!("latitude {} out of range", self.latitude)));
        }
        Ok(())
    }
}

/// Parses `"longitude,latitude"`.
impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((long, lat)) = s.split_once(',') else {
            return Err(Error::Validation(format!("invalid location format: {s}")));
        };
        let longitude = long
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("invalid longitude: {long}")))?;
        let latitude = lat
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("invalid latitude: {lat}")))?;

        Ok(Location { longitude, latitude })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{}", self.longitude, self.latitude)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSpace {
    pub name: String,
    pub theme_color_hexa_code: String,
    pub radius: f64,
    pub location: Location,
}

impl NewSpace {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("space name is empty".to_owned()));
        }
        let hex = self.theme_color_hexa_code.strip_prefix('#').unwrap_or_default();
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!(
                "{} is not a hex color",
                self.theme_color_hexa_code
            )));
        }
        if !(self.radius > 0.0 && self.radius <= MAX_SPACE_RADIUS) {
            return Err(Error::Validation(format!(
                "radius must be in (0, {MAX_SPACE_RADIUS}], got {}",
                self.radius
            )));
        }
        self.location.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: Uuid,
    pub name: String,
    pub theme_color_hexa_code: String,
    pub radius: f64,
    pub location: Location,
    pub admin_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceWithDistance {
    #[serde(flatten)]
    pub space: Space,
    /// Metres from the query point to the space centre, 0 when the point is inside the space.
    pub distance: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
        }
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(MessageType::Text),
            _ => Err(Error::Validation(format!("{s} is not a valid message type"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageInput {
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
}

impl NewMessageInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageType::Text,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::Validation("message content is empty".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "likesCount")]
    pub likes: i64,
    pub child_thread_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub child_thread_messages_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Uuid,
    pub space_id: Uuid,
    /// `None` for a top-level thread.
    pub parent_message_id: Option<Uuid>,
    /// Only top-level threads have one.
    pub first_message_id: Option<Uuid>,
    pub likes: i64,
    pub messages_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Thread {
    pub fn is_top_level(&self) -> bool {
        self.parent_message_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLevelThread {
    #[serde(flatten)]
    pub thread: Thread,
    pub first_message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadWithMessages {
    #[serde(flatten)]
    pub thread: Thread,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sorting {
    #[default]
    Recent,
    Popularity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
    pub is_signed_up: bool,
}

impl User {
    pub fn new(id: UserId, username: String, first_name: String, last_name: String, avatar_url: String) -> Self {
        let is_signed_up = [&username, &first_name, &last_name, &avatar_url]
            .iter()
            .all(|field| !field.is_empty());

        User {
            id,
            username,
            first_name,
            last_name,
            avatar_url,
            is_signed_up,
        }
    }

    /// Placeholder for an id that has no stored profile.
    pub fn unknown(id: UserId) -> Self {
        User::new(id, String::new(), String::new(), String::new(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_parses_long_then_lat() {
        let location: Location = "13.419932,52.554956".parse().unwrap();
        assert_eq!(location, Location::new(13.419932, 52.554956));
        assert!("13.4".parse::<Location>().is_err());
        assert!("a,b".parse::<Location>().is_err());
        assert!(Location::new(13.4, 91.5).validate().is_err());
        assert!(Location::new(-189.2, 52.5).validate().is_err());
    }

    #[test]
    fn space_validation() {
        let mut space = NewSpace {
            name: "Thulestraße 31".to_owned(),
            theme_color_hexa_code: "#A1BA6D".to_owned(),
            radius: 68.0,
            location: Location::new(13.420215, 52.555241),
        };
        assert!(space.validate().is_ok());

        space.radius = 999.0;
        assert!(matches!(space.validate(), Err(Error::Validation(_))));

        space.radius = 68.0;
        space.theme_color_hexa_code = "A1BA6D".to_owned();
        assert!(matches!(space.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn signed_up_requires_every_profile_field() {
        let user = User::new("u1".into(), "ann".into(), "Ann".into(), "Lee".into(), String::new());
        assert!(!user.is_signed_up);

        let user = User::new("u1".into(), "ann".into(), "Ann".into(), "Lee".into(), "https://a/ann".into());
        assert!(user.is_signed_up);
    }
}
