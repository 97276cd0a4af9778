//! Durable store: hashes, score-ordered sets and a geo index over SQLite.
//!
//! Every write bumps a per-key version. `watch` snapshots versions and
//! `exec` only commits when none of them moved, which gives the optimistic
//! transactions the live-update cleanup relies on.

pub mod geo;
pub mod keys;
mod messages;
mod record;
mod spaces;
mod threads;
mod users;

use std::{collections::HashMap, future::Future, str::FromStr, time::Duration};

use sqlx::{
    Row, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::debug;

use crate::{Error, Result, models::Location};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS hashes (
        key TEXT NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, field)
    )",
    "CREATE TABLE IF NOT EXISTS ranked (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        score REAL NOT NULL,
        seq INTEGER NOT NULL,
        PRIMARY KEY (key, member)
    )",
    "CREATE INDEX IF NOT EXISTS ranked_by_score ON ranked (key, score DESC, seq DESC)",
    "CREATE TABLE IF NOT EXISTS geo (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        PRIMARY KEY (key, member)
    )",
    "CREATE TABLE IF NOT EXISTS key_versions (
        key TEXT PRIMARY KEY,
        version INTEGER NOT NULL
    )",
];

/// A single mutation. Batches of these are applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    SetHash {
        key: String,
        fields: Vec<(String, String)>,
    },
    IncrementHashField {
        key: String,
        field: String,
        delta: i64,
    },
    AddRanked {
        key: String,
        member: String,
        score: f64,
    },
    IncrementScore {
        key: String,
        member: String,
        delta: f64,
    },
    RemoveRanked {
        key: String,
        member: String,
    },
    GeoAdd {
        key: String,
        member: String,
        location: Location,
    },
    DeleteKey {
        key: String,
    },
}

impl WriteOp {
    fn key(&self) -> &str {
        match self {
            WriteOp::SetHash { key, .. }
            | WriteOp::IncrementHashField { key, .. }
            | WriteOp::AddRanked { key, .. }
            | WriteOp::IncrementScore { key, .. }
            | WriteOp::RemoveRanked { key, .. }
            | WriteOp::GeoAdd { key, .. }
            | WriteOp::DeleteKey { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub member: String,
    /// Metres from the search origin.
    pub distance: f64,
    pub location: Location,
}

/// Versions of watched keys as of `Store::watch`.
#[derive(Debug)]
pub struct Watch {
    versions: Vec<(String, i64)>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Store> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Fresh private database on a single pinned connection.
    pub async fn in_memory() -> Result<Store> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Fields of a hash. An empty hash is `NotFound`.
    pub async fn get_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT field, value FROM hashes WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound(key.to_owned()));
        }

        rows.iter()
            .map(|row| -> Result<(String, String)> {
                Ok((row.try_get("field")?, row.try_get("value")?))
            })
            .collect()
    }

    pub async fn set_hash(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        self.write(&[WriteOp::SetHash {
            key: key.to_owned(),
            fields,
        }])
        .await
    }

    pub async fn increment_hash_field(&self, key: &str, field: &str, delta: i64) -> Result<()> {
        self.write(&[WriteOp::IncrementHashField {
            key: key.to_owned(),
            field: field.to_owned(),
            delta,
        }])
        .await
    }

    /// Members by score descending, most recently written first on ties.
    /// A negative `count` returns everything past `offset`.
    pub async fn get_ranked(&self, key: &str, offset: i64, count: i64) -> Result<Vec<String>> {
        let members = sqlx::query_scalar(
            "SELECT member FROM ranked WHERE key = ? ORDER BY score DESC, seq DESC LIMIT ? OFFSET ?",
        )
        .bind(key)
        .bind(if count < 0 { -1 } else { count })
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    pub async fn ranked_score(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let score = sqlx::query_scalar("SELECT score FROM ranked WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .fetch_optional(&self.pool)
            .await?;

        Ok(score)
    }

    pub async fn ranked_len(&self, key: &str) -> Result<i64> {
        let len = sqlx::query_scalar("SELECT COUNT(*) FROM ranked WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        Ok(len)
    }

    pub async fn add_ranked(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.write(&[WriteOp::AddRanked {
            key: key.to_owned(),
            member: member.to_owned(),
            score,
        }])
        .await
    }

    pub async fn increment_score(&self, key: &str, member: &str, delta: f64) -> Result<()> {
        self.write(&[WriteOp::IncrementScore {
            key: key.to_owned(),
            member: member.to_owned(),
            delta,
        }])
        .await
    }

    pub async fn remove_ranked(&self, key: &str, member: &str) -> Result<()> {
        self.write(&[WriteOp::RemoveRanked {
            key: key.to_owned(),
            member: member.to_owned(),
        }])
        .await
    }

    pub async fn geo_add(&self, key: &str, member: &str, location: Location) -> Result<()> {
        self.write(&[WriteOp::GeoAdd {
            key: key.to_owned(),
            member: member.to_owned(),
            location,
        }])
        .await
    }

    /// Members within `radius` metres of `origin`, nearest first.
    pub async fn geo_search(&self, key: &str, origin: Location, radius: f64) -> Result<Vec<GeoHit>> {
        let rows = sqlx::query("SELECT member, latitude, longitude FROM geo WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let location = Location::new(row.try_get("longitude")?, row.try_get("latitude")?);
            let distance = geo::distance(origin, location);
            if distance <= radius {
                hits.push(GeoHit {
                    member: row.try_get("member")?,
                    distance,
                    location,
                });
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        Ok(hits)
    }

    /// Applies `ops` in one transaction.
    pub async fn write(&self, ops: &[WriteOp]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            apply(&mut tx, op).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn watch(&self, keys: &[String]) -> Result<Watch> {
        let mut conn = self.pool.acquire().await?;
        let mut versions = Vec::with_capacity(keys.len());
        for key in keys {
            versions.push((key.clone(), version_of(&mut conn, key).await?));
        }
        Ok(Watch { versions })
    }

    /// Applies `ops` only if no watched key was written since `watch`.
    pub async fn exec(&self, watch: Watch, ops: &[WriteOp]) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await?;
            for (key, version) in &watch.versions {
                if version_of(&mut tx, key).await? != *version {
                    return Err(Error::Conflict(key.clone()));
                }
            }
            for op in ops {
                apply(&mut tx, op).await?;
            }
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Err(Error::Store(sqlx::Error::Database(db)))
                if matches!(db.code().as_deref(), Some("5" | "517")) =>
            {
                Err(Error::Conflict(db.message().to_owned()))
            }
            other => other,
        }
    }

    /// Optimistic check-then-act over `keys`.
    ///
    /// `decide` reads whatever it needs and returns the writes to commit, or
    /// `None` when there is nothing to do. The writes commit only if no watched
    /// key moved meanwhile; otherwise the whole round is retried, up to
    /// `max_attempts` times. Returns whether writes were committed.
    pub async fn compare_and_act<E, F, Fut>(
        &self,
        keys: &[String],
        max_attempts: usize,
        mut decide: F,
    ) -> std::result::Result<bool, E>
    where
        E: From<Error>,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Option<Vec<WriteOp>>, E>>,
    {
        for attempt in 1..=max_attempts {
            let watch = self.watch(keys).await?;
            let Some(ops) = decide().await? else {
                return Ok(false);
            };

            match self.exec(watch, &ops).await {
                Ok(()) => return Ok(true),
                Err(Error::Conflict(key)) => {
                    debug!(attempt, %key, "watched key changed, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::Conflict(keys.join(" ")).into())
    }
}

async fn version_of(conn: &mut SqliteConnection, key: &str) -> Result<i64> {
    let version = sqlx::query_scalar("SELECT version FROM key_versions WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(version.unwrap_or(0))
}

async fn apply(conn: &mut SqliteConnection, op: &WriteOp) -> Result<()> {
    match op {
        WriteOp::SetHash { key, fields } => {
            for (field, value) in fields {
                sqlx::query(
                    "INSERT INTO hashes (key, field, value) VALUES (?, ?, ?)
                     ON CONFLICT (key, field) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(field)
                .bind(value)
                .execute(&mut *conn)
                .await?;
            }
        }
        WriteOp::IncrementHashField { key, field, delta } => {
            // One statement, so the write lock is taken before anything is read.
            // A stored value that is not an integer leaves the row untouched.
            let updated = sqlx::query(
                "INSERT INTO hashes (key, field, value) VALUES (?, ?, ?)
                 ON CONFLICT (key, field) DO UPDATE
                 SET value = CAST(CAST(hashes.value AS INTEGER) + CAST(excluded.value AS INTEGER) AS TEXT)
                 WHERE CAST(CAST(hashes.value AS INTEGER) AS TEXT) = hashes.value",
            )
            .bind(key)
            .bind(field)
            .bind(delta.to_string())
            .execute(&mut *conn)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(Error::corrupt(key, format!("{field} is not an integer")));
            }
        }
        WriteOp::AddRanked { key, member, score } => {
            sqlx::query(
                "INSERT INTO ranked (key, member, score, seq)
                 VALUES (?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM ranked))
                 ON CONFLICT (key, member) DO UPDATE SET score = excluded.score, seq = excluded.seq",
            )
            .bind(key)
            .bind(member)
            .bind(score)
            .execute(&mut *conn)
            .await?;
        }
        WriteOp::IncrementScore { key, member, delta } => {
            sqlx::query(
                "INSERT INTO ranked (key, member, score, seq)
                 VALUES (?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM ranked))
                 ON CONFLICT (key, member) DO UPDATE SET score = ranked.score + excluded.score, seq = excluded.seq",
            )
            .bind(key)
            .bind(member)
            .bind(delta)
            .execute(&mut *conn)
            .await?;
        }
        WriteOp::RemoveRanked { key, member } => {
            sqlx::query("DELETE FROM ranked WHERE key = ? AND member = ?")
                .bind(key)
                .bind(member)
                .execute(&mut *conn)
                .await?;
        }
        WriteOp::GeoAdd {
            key,
            member,
            location,
        } => {
            sqlx::query(
                "INSERT INTO geo (key, member, latitude, longitude) VALUES (?, ?, ?, ?)
                 ON CONFLICT (key, member) DO UPDATE SET latitude = excluded.latitude, longitude = excluded.longitude",
            )
            .bind(key)
            .bind(member)
            .bind(location.latitude)
            .bind(location.longitude)
            .execute(&mut *conn)
            .await?;
        }
        WriteOp::DeleteKey { key } => {
            for table in ["hashes", "ranked", "geo"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE key = ?"))
                    .bind(key)
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }

    sqlx::query(
        "INSERT INTO key_versions (key, version) VALUES (?, 1)
         ON CONFLICT (key) DO UPDATE SET version = version + 1",
    )
    .bind(op.key())
    .execute(&mut *conn)
    .await?;

    Ok(())
}
