// In-memory collaborator with fault injection, for tests and local experiments
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;

use super::models::*;
use super::realtime::{RealtimeHub, Subscription};
use super::{Backend, BackendError, BackendResult};

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    ProfileLookup,
    ProfileWrite,
    PodLookup,
    ListPods,
    InsertPod,
    DeletePod,
    InsertMember,
    ListMessages,
    InsertMessage,
    Subscribe,
}

#[derive(Default)]
struct Tables {
    users: Vec<UserRecord>,
    sessions: Vec<(String, UserId, DateTime<Utc>)>,
    profiles: Vec<Profile>,
    pods: Vec<Pod>,
    members: Vec<PodMember>,
    messages: Vec<Message>,
}

pub struct MemoryBackend {
    tables: Mutex<Tables>,
    faults: Mutex<HashSet<Fault>>,
    hub: RealtimeHub,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_hub(RealtimeHub::default())
    }

    pub fn with_hub(hub: RealtimeHub) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Mutex::new(HashSet::new()),
            hub,
        }
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    /// Make every call of `fault`'s operation fail until `heal` is called.
    pub async fn fail(&self, fault: Fault) {
        self.faults.lock().await.insert(fault);
    }

    pub async fn heal(&self, fault: Fault) {
        self.faults.lock().await.remove(&fault);
    }

    pub async fn member_rows(&self, pod_id: &PodId) -> Vec<PodMember> {
        let tables = self.tables.lock().await;
        tables
            .members
            .iter()
            .filter(|m| &m.pod_id == pod_id)
            .cloned()
            .collect()
    }

    async fn check(&self, fault: Fault) -> BackendResult<()> {
        if self.faults.lock().await.contains(&fault) {
            return Err(BackendError::Unavailable(format!("injected fault: {fault:?}")));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn profile_by(tables: &Tables, id: &ProfileId) -> Option<Profile> {
    tables.profiles.iter().find(|p| &p.id == id).cloned()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn profile_by_user(&self, user_id: &UserId) -> BackendResult<Option<Profile>> {
        self.check(Fault::ProfileLookup).await?;
        let tables = self.tables.lock().await;
        Ok(tables.profiles.iter().find(|p| &p.user_id == user_id).cloned())
    }

    async fn profile_by_id(&self, id: &ProfileId) -> BackendResult<Option<Profile>> {
        self.check(Fault::ProfileLookup).await?;
        let tables = self.tables.lock().await;
        Ok(profile_by(&tables, id))
    }

    async fn insert_profile(
        &self,
        user_id: &UserId,
        fields: ProfileFields,
    ) -> BackendResult<Profile> {
        self.check(Fault::ProfileWrite).await?;
        let mut tables = self.tables.lock().await;
        if tables.profiles.iter().any(|p| &p.user_id == user_id) {
            return Err(BackendError::Conflict("profile already exists".into()));
        }
        if tables.profiles.iter().any(|p| p.username == fields.username) {
            return Err(BackendError::Conflict("profile already exists".into()));
        }

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
        tables.profiles.push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(
        &self,
        user_id: &UserId,
        fields: ProfileFields,
    ) -> BackendResult<Profile> {
        self.check(Fault::ProfileWrite).await?;
        let mut tables = self.tables.lock().await;
        if tables
            .profiles
            .iter()
            .any(|p| p.username == fields.username && &p.user_id != user_id)
        {
            return Err(BackendError::Conflict("profile already exists".into()));
        }

        let profile = tables
            .profiles
            .iter_mut()
            .find(|p| &p.user_id == user_id)
            .ok_or_else(|| BackendError::NotFound(format!("profile for user {user_id}")))?;

        profile.username = fields.username;
        profile.display_name = fields.display_name;
        profile.bio = fields.bio;
        profile.gender = fields.gender;
        profile.orientation = fields.orientation;
        profile.relationship_status = fields.relationship_status;
        profile.birth_date = fields.birth_date;
        profile.location = fields.location;
        profile.avatar_url = fields.avatar_url;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn pod(&self, id: &PodId) -> BackendResult<Option<Pod>> {
        self.check(Fault::PodLookup).await?;
        let tables = self.tables.lock().await;
        Ok(tables.pods.iter().find(|p| &p.id == id).cloned())
    }

    async fn pods_with_members(&self) -> BackendResult<Vec<PodWithMembers>> {
        self.check(Fault::ListPods).await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .pods
            .iter()
            .map(|pod| PodWithMembers {
                pod: pod.clone(),
                members: tables
                    .members
                    .iter()
                    .filter(|m| m.pod_id == pod.id)
                    .filter_map(|m| profile_by(&tables, &m.profile_id))
                    .collect(),
            })
            .collect())
    }

    async fn insert_pod(&self, new: NewPod) -> BackendResult<Pod> {
        self.check(Fault::InsertPod).await?;
        let now = Utc::now();
        let pod = Pod {
            id: PodId::generate(),
            name: new.name,
            description: new.description,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().await.pods.push(pod.clone());
        Ok(pod)
    }

    async fn delete_pod(&self, id: &PodId) -> BackendResult<bool> {
        self.check(Fault::DeletePod).await?;
        let mut tables = self.tables.lock().await;
        let before = tables.pods.len();
        tables.pods.retain(|p| &p.id != id);
        tables.members.retain(|m| &m.pod_id != id);
        tables.messages.retain(|m| &m.pod_id != id);
        Ok(tables.pods.len() < before)
    }

    async fn insert_member(
        &self,
        pod_id: &PodId,
        profile_id: &ProfileId,
    ) -> BackendResult<PodMember> {
        self.check(Fault::InsertMember).await?;
        let mut tables = self.tables.lock().await;
        if !tables.pods.iter().any(|p| &p.id == pod_id)
            || !tables.profiles.iter().any(|p| &p.id == profile_id)
        {
            return Err(BackendError::NotFound(
                "pod membership references a missing row".into(),
            ));
        }
        if tables
            .members
            .iter()
            .any(|m| &m.pod_id == pod_id && &m.profile_id == profile_id)
        {
            return Err(BackendError::Conflict("pod membership already exists".into()));
        }

        let member = PodMember {
            id: MemberId::generate(),
            pod_id: pod_id.clone(),
            profile_id: profile_id.clone(),
            joined_at: Utc::now(),
        };
        tables.members.push(member.clone());
        Ok(member)
    }

    async fn messages_with_senders(
        &self,
        pod_id: &PodId,
    ) -> BackendResult<Vec<MessageWithSender>> {
        self.check(Fault::ListMessages).await?;
        let tables = self.tables.lock().await;
        let mut messages: Vec<MessageWithSender> = tables
            .messages
            .iter()
            .filter(|m| &m.pod_id == pod_id)
            .filter_map(|m| {
                profile_by(&tables, &m.sender_id).map(|sender| MessageWithSender {
                    message: m.clone(),
                    sender,
                })
            })
            .collect();
        messages.sort_by(|a, b| {
            (a.message.created_at, &a.message.id).cmp(&(b.message.created_at, &b.message.id))
        });
        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> BackendResult<Message> {
        self.check(Fault::InsertMessage).await?;
        let mut tables = self.tables.lock().await;
        if !tables.pods.iter().any(|p| p.id == new.pod_id)
            || !tables.profiles.iter().any(|p| p.id == new.sender_id)
        {
            return Err(BackendError::NotFound("message references a missing row".into()));
        }

        let now = Utc::now();
        let message = Message {
            id: MessageId::generate(),
            pod_id: new.pod_id,
            sender_id: new.sender_id,
            content: new.content,
            created_at: now,
            updated_at: now,
        };
        tables.messages.push(message.clone());

        // Published under the table lock so delivery order matches row order.
        self.hub.publish(message.clone());
        Ok(message)
    }

    async fn subscribe_messages(&self, pod_id: &PodId) -> BackendResult<Subscription> {
        self.check(Fault::Subscribe).await?;
        Ok(self.hub.subscribe(pod_id.clone()))
    }

    async fn insert_user(&self, email: &str, password_hash: &str) -> BackendResult<UserRecord> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(BackendError::Conflict("account already exists".into()));
        }

        let user = UserRecord {
            id: UserId::generate(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> BackendResult<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_session(
        &self,
        user_id: &UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.iter().any(|(t, _, _)| t == token) {
            return Err(BackendError::Conflict("session already exists".into()));
        }
        tables
            .sessions
            .push((token.to_string(), user_id.clone(), expires_at));
        Ok(())
    }

    async fn session_user(&self, token: &str) -> BackendResult<Option<UserId>> {
        let tables = self.tables.lock().await;
        let now = Utc::now();
        Ok(tables
            .sessions
            .iter()
            .find(|(t, _, expires_at)| t == token && *expires_at > now)
            .map(|(_, user_id, _)| user_id.clone()))
    }

    async fn delete_session(&self, token: &str) -> BackendResult<()> {
        self.tables
            .lock()
            .await
            .sessions
            .retain(|(t, _, _)| t != token);
        Ok(())
    }
}
