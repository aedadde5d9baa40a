use serde::Serialize;

use crate::backend::{
    BackendError, BackendResult, Delivery, DynBackend, Message, MessageInserted,
    MessageWithSender, NewMessage, Pod, PodId, Profile, Subscription, UserId,
};
use crate::error::{PodError, PodResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Loading,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Initial fetch for one binding, tagged with the generation that issued it.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub generation: u64,
    pub pod_id: PodId,
    pub user_id: Option<UserId>,
}

/// Independent results of the three initial fetches.
pub struct InitialLoad {
    pub generation: u64,
    pub pod_id: PodId,
    pub pod: BackendResult<Option<Pod>>,
    pub profile: BackendResult<Option<Profile>>,
    pub messages: BackendResult<Vec<MessageWithSender>>,
}

/// A raw insert event from the subscription opened by `generation`.
#[derive(Debug, Clone)]
pub struct Notification {
    pub generation: u64,
    pub event: MessageInserted,
}

/// An insert event with its sender profile looked up.
#[derive(Debug)]
pub struct Arrival {
    pub generation: u64,
    pub message: Message,
    pub sender: BackendResult<Option<Profile>>,
}

/// One rendered chat line.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry<'a> {
    pub message: &'a MessageWithSender,
    pub own: bool,
}

/// Live view of one pod's chat for one viewer.
///
/// Owns at most one subscription. Every binding bumps `generation`; loads and
/// arrivals carrying an older generation are dropped on apply.
pub struct ChatSession {
    backend: DynBackend,
    user_id: Option<UserId>,
    state: SessionState,
    generation: u64,
    pod_id: Option<PodId>,
    pod: Option<Pod>,
    profile: Option<Profile>,
    messages: Vec<MessageWithSender>,
    subscription: Option<Subscription>,
    notices: Vec<Notice>,
}

impl ChatSession {
    pub fn new(backend: DynBackend, user_id: Option<UserId>) -> Self {
        Self {
            backend,
            user_id,
            state: SessionState::Uninitialized,
            generation: 0,
            pod_id: None,
            pod: None,
            profile: None,
            messages: Vec::new(),
            subscription: None,
            notices: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pod_id(&self) -> Option<&PodId> {
        self.pod_id.as_ref()
    }

    pub fn pod(&self) -> Option<&Pod> {
        self.pod.as_ref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn messages(&self) -> &[MessageWithSender] {
        &self.messages
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Tear down the current binding and start a new one for `pod_id`.
    pub fn bind(&mut self, pod_id: PodId) -> LoadRequest {
        self.release_subscription();
        self.generation += 1;
        self.messages.clear();
        self.pod = None;
        self.pod_id = Some(pod_id.clone());
        self.state = SessionState::Loading;

        tracing::debug!(pod_id = %pod_id, generation = self.generation, "chat session bound");
        LoadRequest {
            generation: self.generation,
            pod_id,
            user_id: self.user_id.clone(),
        }
    }

    /// Run the three initial fetches concurrently. Does not touch the session,
    /// so a caller may rebind while this is in flight.
    pub async fn fetch_initial(backend: &DynBackend, request: LoadRequest) -> InitialLoad {
        let profile_fetch = async {
            match &request.user_id {
                Some(user_id) => backend.profile_by_user(user_id).await,
                None => Ok(None),
            }
        };

        let (pod, profile, messages) = tokio::join!(
            backend.pod(&request.pod_id),
            profile_fetch,
            backend.messages_with_senders(&request.pod_id),
        );

        InitialLoad {
            generation: request.generation,
            pod_id: request.pod_id,
            pod,
            profile,
            messages,
        }
    }

    /// Install a finished load and open the subscription. Returns false when
    /// the load belongs to an older binding.
    pub async fn apply_load(&mut self, load: InitialLoad) -> bool {
        if load.generation != self.generation || self.state != SessionState::Loading {
            tracing::debug!(
                pod_id = %load.pod_id,
                stale = load.generation,
                current = self.generation,
                "discarding stale load"
            );
            return false;
        }

        match load.pod {
            Ok(Some(pod)) => self.pod = Some(pod),
            Ok(None) => tracing::warn!(pod_id = %load.pod_id, "pod not found"),
            Err(e) => {
                tracing::error!("Error fetching pod: {}", e);
                self.notices.push(Notice::error("Failed to load pod details"));
            }
        }

        match load.profile {
            Ok(profile) => self.profile = profile,
            Err(e) => tracing::error!("Error fetching profile: {}", e),
        }

        match load.messages {
            Ok(messages) => self.messages = messages,
            Err(e) => {
                tracing::error!("Error fetching messages: {}", e);
                self.notices.push(Notice::error("Failed to load messages"));
            }
        }

        // Any subscription left here belongs to an older binding.
        self.release_subscription();
        match self.backend.subscribe_messages(&load.pod_id).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                tracing::error!(pod_id = %load.pod_id, "Error subscribing to messages: {}", e);
                self.notices
                    .push(Notice::error("Failed to subscribe to new messages"));
            }
        }

        self.state = SessionState::Live;
        tracing::info!(
            pod_id = %load.pod_id,
            messages = self.messages.len(),
            "chat session live"
        );
        true
    }

    /// Bind, fetch and apply in one step.
    pub async fn open(&mut self, pod_id: PodId) -> bool {
        let request = self.bind(pod_id);
        let load = Self::fetch_initial(&self.backend, request).await;
        self.apply_load(load).await
    }

    /// Next insert event for the bound pod. `None` when nothing is
    /// subscribed or the stream has ended. Dropped events leave a notice.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        let generation = self.generation;
        let subscription = self.subscription.as_mut()?;
        loop {
            match subscription.recv().await? {
                Delivery::Inserted(event) => return Some(Notification { generation, event }),
                Delivery::Lagged(skipped) => {
                    tracing::warn!(skipped, "chat session missed new messages");
                    self.notices.push(Notice::error("Some messages were missed"));
                }
            }
        }
    }

    /// Look up the sender of a raw insert. The row carries only the sender
    /// id, so the profile always comes from the backend.
    pub async fn resolve_notification(backend: &DynBackend, notification: Notification) -> Arrival {
        let message = notification.event.new;
        let sender = backend.profile_by_id(&message.sender_id).await;
        Arrival {
            generation: notification.generation,
            message,
            sender,
        }
    }

    /// Append an arrival to the end of the list. Returns whether it was
    /// appended.
    pub fn apply_arrival(&mut self, arrival: Arrival) -> bool {
        if arrival.generation != self.generation {
            tracing::debug!(message_id = %arrival.message.id, "discarding stale arrival");
            return false;
        }
        if self.pod_id.as_ref() != Some(&arrival.message.pod_id) {
            tracing::debug!(message_id = %arrival.message.id, "discarding arrival for another pod");
            return false;
        }
        if self
            .messages
            .iter()
            .any(|m| m.message.id == arrival.message.id)
        {
            tracing::debug!(message_id = %arrival.message.id, "duplicate delivery ignored");
            return false;
        }

        let sender = match arrival.sender {
            Ok(Some(sender)) => sender,
            Ok(None) => {
                tracing::warn!(
                    message_id = %arrival.message.id,
                    sender_id = %arrival.message.sender_id,
                    "sender profile missing"
                );
                self.notices.push(Notice::error("Failed to load new message"));
                return false;
            }
            Err(e) => {
                tracing::error!("Error fetching message sender: {}", e);
                self.notices.push(Notice::error("Failed to load new message"));
                return false;
            }
        };

        self.messages.push(MessageWithSender {
            message: arrival.message,
            sender,
        });
        true
    }

    /// Wait for, resolve and apply one notification. `None` when there is
    /// nothing to wait on.
    pub async fn pump(&mut self) -> Option<bool> {
        let notification = self.next_notification().await?;
        let arrival = Self::resolve_notification(&self.backend, notification).await;
        Some(self.apply_arrival(arrival))
    }

    /// Insert a message as the current profile. Never appends locally; the
    /// row shows up through the subscription. Returns `Ok(None)` when there
    /// is nothing to send.
    pub async fn send_message(&self, text: &str) -> PodResult<Option<Message>> {
        let (Some(profile), Some(pod_id)) = (&self.profile, &self.pod_id) else {
            return Ok(None);
        };
        post_message(&self.backend, pod_id, profile, text).await
    }

    pub fn is_own(&self, message: &MessageWithSender) -> bool {
        self.profile
            .as_ref()
            .is_some_and(|profile| profile.id == message.sender.id)
    }

    pub fn entries(&self) -> impl Iterator<Item = ChatEntry<'_>> {
        self.messages.iter().map(|message| ChatEntry {
            message,
            own: self.is_own(message),
        })
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Release the subscription and forget the binding.
    pub fn unbind(&mut self) {
        self.release_subscription();
        self.generation += 1;
        self.pod_id = None;
        self.pod = None;
        self.messages.clear();
        self.state = SessionState::Uninitialized;
    }

    fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

/// Insert `text` into a pod as `sender`. Blank text is not sent.
pub async fn post_message(
    backend: &DynBackend,
    pod_id: &PodId,
    sender: &Profile,
    text: &str,
) -> PodResult<Option<Message>> {
    let content = text.trim();
    if content.is_empty() {
        return Ok(None);
    }

    let message = backend
        .insert_message(NewMessage {
            pod_id: pod_id.clone(),
            sender_id: sender.id.clone(),
            content: content.to_string(),
        })
        .await
        .inspect_err(|e| tracing::error!(pod_id = %pod_id, "Error sending message: {}", e));
    let message = match message {
        Ok(message) => message,
        Err(BackendError::NotFound(_)) => return Err(missing_message_row(backend, pod_id).await),
        Err(e) => return Err(PodError::write("message")(e)),
    };

    tracing::debug!(message_id = %message.id, pod_id = %pod_id, "message sent");
    Ok(Some(message))
}

/// Name the row a rejected insert pointed at. The sender is blamed only once
/// the pod is known to exist.
async fn missing_message_row(backend: &DynBackend, pod_id: &PodId) -> PodError {
    match backend.pod(pod_id).await {
        Ok(Some(_)) => PodError::NotFound("Profile"),
        Ok(None) => PodError::NotFound("Pod"),
        Err(e) => PodError::fetch("pod details")(e),
    }
}
