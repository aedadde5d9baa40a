// SQLite collaborator - rows over an r2d2 pool, inserts fanned out through the hub
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{ffi, params, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Mutex;

use super::models::*;
use super::realtime::{RealtimeHub, Subscription};
use super::{Backend, BackendError, BackendResult};
use crate::db::DbPool;

const PROFILE_COLUMNS: &str = "p.id, p.user_id, p.username, p.display_name, p.bio, p.gender, \
     p.orientation, p.relationship_status, p.birth_date, p.location, p.avatar_url, \
     p.created_at, p.updated_at";

pub struct SqliteBackend {
    pool: DbPool,
    hub: RealtimeHub,
    /// Serializes message stamping, insert and publish.
    message_writer: Mutex<()>,
}

impl SqliteBackend {
    pub fn new(pool: DbPool, hub: RealtimeHub) -> Self {
        Self {
            pool,
            hub,
            message_writer: Mutex::new(()),
        }
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Parse a stored enum column, treating unknown text as a conversion failure.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        text.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Map a profile whose columns start at `offset` (see `PROFILE_COLUMNS`).
fn profile_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: ProfileId(row.get(offset)?),
        user_id: UserId(row.get(offset + 1)?),
        username: row.get(offset + 2)?,
        display_name: row.get(offset + 3)?,
        bio: row.get(offset + 4)?,
        gender: parse_column(row, offset + 5)?,
        orientation: parse_column(row, offset + 6)?,
        relationship_status: parse_column(row, offset + 7)?,
        birth_date: row.get(offset + 8)?,
        location: row.get(offset + 9)?,
        avatar_url: row.get(offset + 10)?,
        created_at: row.get(offset + 11)?,
        updated_at: row.get(offset + 12)?,
    })
}

fn pod_from_row(row: &Row<'_>) -> rusqlite::Result<Pod> {
    Ok(Pod {
        id: PodId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(row.get(0)?),
        pod_id: PodId(row.get(1)?),
        sender_id: ProfileId(row.get(2)?),
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Turn constraint violations into the collaborator's own error kinds.
fn classify(err: rusqlite::Error, what: &str) -> BackendError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return BackendError::Conflict(format!("{what} already exists"));
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return BackendError::NotFound(format!("{what} references a missing row"));
            }
            _ => {}
        }
    }
    BackendError::Sql(err)
}

fn select_profile(
    conn: &rusqlite::Connection,
    column: &str,
    value: &str,
) -> BackendResult<Option<Profile>> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.{column} = ?1");
    let profile = conn
        .query_row(&sql, params![value], |row| profile_from_row(row, 0))
        .optional()?;
    Ok(profile)
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn profile_by_user(&self, user_id: &UserId) -> BackendResult<Option<Profile>> {
        let conn = self.pool.get()?;
        select_profile(&conn, "user_id", user_id.as_str())
    }

    async fn profile_by_id(&self, id: &ProfileId) -> BackendResult<Option<Profile>> {
        let conn = self.pool.get()?;
        select_profile(&conn, "id", id.as_str())
    }

    async fn insert_profile(
        &self,
        user_id: &UserId,
        fields: ProfileFields,
    ) -> BackendResult<Profile> {
        let conn = self.pool.get()?;
        let now = Utc::now();
        let profile = Profile {
            id: ProfileId::generate(),
            user_id: user_id.clone(),
            username: fields.username,
            display_name: fields.display_name,
            bio: fields.bio,
            gender: fields.gender,
            orientation: fields.orientation,
            relationship_status: fields.relationship_status,
            birth_date: fields.birth_date,
            location: fields.location,
            avatar_url: fields.avatar_url,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO profiles (id, user_id, username, display_name, bio, gender, orientation,
                                   relationship_status, birth_date, location, avatar_url,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                profile.id.as_str(),
                profile.user_id.as_str(),
                profile.username,
                profile.display_name,
                profile.bio,
                profile.gender.map(|g| g.as_str()),
                profile.orientation.map(|o| o.as_str()),
                profile.relationship_status.map(|r| r.as_str()),
                profile.birth_date,
                profile.location,
                profile.avatar_url,
                profile.created_at,
                profile.updated_at,
            ],
        )
        .map_err(|e| classify(e, "profile"))?;

        Ok(profile)
    }

    async fn update_profile(
        &self,
        user_id: &UserId,
        fields: ProfileFields,
    ) -> BackendResult<Profile> {
        let conn = self.pool.get()?;
        let rows = conn
            .execute(
                "UPDATE profiles SET username = ?2, display_name = ?3, bio = ?4, gender = ?5,
                        orientation = ?6, relationship_status = ?7, birth_date = ?8,
                        location = ?9, avatar_url = ?10, updated_at = ?11
                 WHERE user_id = ?1",
                params![
                    user_id.as_str(),
                    fields.username,
                    fields.display_name,
                    fields.bio,
                    fields.gender.map(|g| g.as_str()),
                    fields.orientation.map(|o| o.as_str()),
                    fields.relationship_status.map(|r| r.as_str()),
                    fields.birth_date,
                    fields.location,
                    fields.avatar_url,
                    Utc::now(),
                ],
            )
            .map_err(|e| classify(e, "profile"))?;

        if rows == 0 {
            return Err(BackendError::NotFound(format!("profile for user {user_id}")));
        }

        select_profile(&conn, "user_id", user_id.as_str())?
            .ok_or_else(|| BackendError::NotFound(format!("profile for user {user_id}")))
    }

    async fn pod(&self, id: &PodId) -> BackendResult<Option<Pod>> {
        let conn = self.pool.get()?;
        let pod = conn
            .query_row(
                "SELECT id, name, description, created_at, updated_at FROM pods WHERE id = ?1",
                params![id.as_str()],
                pod_from_row,
            )
            .optional()?;
        Ok(pod)
    }

    async fn pods_with_members(&self) -> BackendResult<Vec<PodWithMembers>> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, description, created_at, updated_at
             FROM pods
             ORDER BY created_at ASC, id ASC",
        )?;
        let pods: Vec<Pod> = stmt
            .query_map([], pod_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let sql = format!(
            "SELECT m.pod_id, {PROFILE_COLUMNS}
             FROM pod_members m
             JOIN profiles p ON p.id = m.profile_id
             ORDER BY m.joined_at ASC, m.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut members: HashMap<String, Vec<Profile>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, profile_from_row(row, 1)?))
        })?;
        for row in rows {
            let (pod_id, profile) = row?;
            members.entry(pod_id).or_default().push(profile);
        }

        Ok(pods
            .into_iter()
            .map(|pod| {
                let members = members.remove(pod.id.as_str()).unwrap_or_default();
                PodWithMembers { pod, members }
            })
            .collect())
    }

    async fn insert_pod(&self, new: NewPod) -> BackendResult<Pod> {
        let conn = self.pool.get()?;
        let now = Utc::now();
        let pod = Pod {
            id: PodId::generate(),
            name: new.name,
            description: new.description,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO pods (id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pod.id.as_str(),
                pod.name,
                pod.description,
                pod.created_at,
                pod.updated_at
            ],
        )
        .map_err(|e| classify(e, "pod"))?;

        Ok(pod)
    }

    async fn delete_pod(&self, id: &PodId) -> BackendResult<bool> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM pods WHERE id = ?1", params![id.as_str()])?;
        Ok(rows > 0)
    }

    async fn insert_member(
        &self,
        pod_id: &PodId,
        profile_id: &ProfileId,
    ) -> BackendResult<PodMember> {
        let conn = self.pool.get()?;
        let member = PodMember {
            id: MemberId::generate(),
            pod_id: pod_id.clone(),
            profile_id: profile_id.clone(),
            joined_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO pod_members (id, pod_id, profile_id, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                member.id.as_str(),
                member.pod_id.as_str(),
                member.profile_id.as_str(),
                member.joined_at
            ],
        )
        .map_err(|e| classify(e, "pod membership"))?;

        Ok(member)
    }

    async fn messages_with_senders(
        &self,
        pod_id: &PodId,
    ) -> BackendResult<Vec<MessageWithSender>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT m.id, m.pod_id, m.sender_id, m.content, m.created_at, m.updated_at,
                    {PROFILE_COLUMNS}
             FROM messages m
             JOIN profiles p ON p.id = m.sender_id
             WHERE m.pod_id = ?1
             ORDER BY m.created_at ASC, m.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![pod_id.as_str()], |row| {
                Ok(MessageWithSender {
                    message: message_from_row(row)?,
                    sender: profile_from_row(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> BackendResult<Message> {
        let conn = self.pool.get()?;
        // Held from timestamp to publish, so live delivery follows history order.
        let _writer = self
            .message_writer
            .lock()
            .map_err(|_| BackendError::Unavailable("message writer lock poisoned".into()))?;

        let now = Utc::now();
        let message = Message {
            id: MessageId::generate(),
            pod_id: new.pod_id,
            sender_id: new.sender_id,
            content: new.content,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO messages (id, pod_id, sender_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.as_str(),
                message.pod_id.as_str(),
                message.sender_id.as_str(),
                message.content,
                message.created_at,
                message.updated_at
            ],
        )
        .map_err(|e| classify(e, "message"))?;

        self.hub.publish(message.clone());
        Ok(message)
    }

    async fn subscribe_messages(&self, pod_id: &PodId) -> BackendResult<Subscription> {
        Ok(self.hub.subscribe(pod_id.clone()))
    }

    async fn insert_user(&self, email: &str, password_hash: &str) -> BackendResult<UserRecord> {
        let conn = self.pool.get()?;
        let user = UserRecord {
            id: UserId::generate(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id.as_str(), user.email, user.password_hash, user.created_at],
        )
        .map_err(|e| classify(e, "account"))?;

        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> BackendResult<Option<UserRecord>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(UserRecord {
                        id: UserId(row.get(0)?),
                        email: row.get(1)?,
                        password_hash: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    async fn create_session(
        &self,
        user_id: &UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id.as_str(), expires_at],
        )
        .map_err(|e| classify(e, "session"))?;
        Ok(())
    }

    async fn session_user(&self, token: &str) -> BackendResult<Option<UserId>> {
        let conn = self.pool.get()?;
        let user_id: Option<String> = conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, Utc::now()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user_id.map(UserId))
    }

    async fn delete_session(&self, token: &str) -> BackendResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }
}
