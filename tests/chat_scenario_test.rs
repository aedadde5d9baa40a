use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pod::backend::{
    DynBackend, MemoryBackend, Profile, ProfileFields, RealtimeHub, SqliteBackend, UserId,
};
use pod::chat::{ChatSession, SessionState};
use pod::db;
use pod::pods::{is_member, JoinOutcome, PodMembershipManager};
use pod::profiles::ProfileStore;

async fn person(backend: &DynBackend, username: &str) -> (UserId, Profile) {
    let user = backend
        .insert_user(&format!("{username}@example.com"), "hash")
        .await
        .unwrap();
    let profile = ProfileStore::new(backend.clone())
        .create_profile(
            &user.id,
            ProfileFields {
                username: username.into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    (user.id, profile)
}

/// One notification round-trip, bounded so a missing delivery fails fast.
async fn pump(session: &mut ChatSession) -> bool {
    tokio::time::timeout(Duration::from_secs(2), session.pump())
        .await
        .expect("no notification arrived")
        .expect("subscription closed")
}

async fn dinner_club(backend: DynBackend, active: impl Fn() -> usize) {
    let (p_user, p) = person(&backend, "p").await;
    let (q_user, q) = person(&backend, "q").await;

    // P creates the pod and is its only member.
    let mut p_pods = PodMembershipManager::new(backend.clone(), Some(p.clone()));
    let created = p_pods.create_pod("Dinner Club", None).await.unwrap();
    let listed = p_pods.list_pods().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].pod.name, "Dinner Club");
    assert_eq!(listed[0].members.len(), 1);
    assert_eq!(listed[0].members[0].id, p.id);

    // Q joins; both are members.
    let mut q_pods = PodMembershipManager::new(backend.clone(), Some(q.clone()));
    assert_eq!(
        q_pods.join_pod(&created.pod.id).await.unwrap(),
        JoinOutcome::Joined
    );
    let listed = q_pods.list_pods().await.unwrap();
    let ids: Vec<_> = listed[0].members.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec![p.id.clone(), q.id.clone()]);
    assert!(is_member(&listed[0], &q.id));

    // Both open live sessions on the pod.
    let mut p_chat = ChatSession::new(backend.clone(), Some(p_user));
    let mut q_chat = ChatSession::new(backend.clone(), Some(q_user));
    p_chat.open(created.pod.id.clone()).await;
    q_chat.open(created.pod.id.clone()).await;
    assert_eq!(p_chat.state(), SessionState::Live);
    assert_eq!(q_chat.state(), SessionState::Live);
    assert_eq!(active(), 2);

    // Whitespace sends nothing.
    assert!(p_chat.send_message("  \t ").await.unwrap().is_none());

    // P says hi; each session appends it exactly once.
    p_chat.send_message("hi").await.unwrap().unwrap();
    assert!(pump(&mut p_chat).await);
    assert!(pump(&mut q_chat).await);

    for (session, own) in [(&p_chat, true), (&q_chat, false)] {
        let entries: Vec<_> = session.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.message.content, "hi");
        assert_eq!(entries[0].message.sender.id, p.id);
        assert_eq!(entries[0].own, own);
    }

    p_chat.unbind();
    drop(q_chat);
    assert_eq!(active(), 0);
}

#[tokio::test]
async fn dinner_club_over_memory_backend() {
    let memory = Arc::new(MemoryBackend::new());
    let hub = memory.hub().clone();
    dinner_club(memory, move || hub.active_subscriptions()).await;
}

#[tokio::test]
async fn dinner_club_over_sqlite_backend() {
    let tmp = TempDir::new().unwrap();
    let pool = db::create_pool(&tmp.path().join("test.db")).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let hub = RealtimeHub::new(16);
    let backend = Arc::new(SqliteBackend::new(pool, hub.clone()));
    dinner_club(backend, move || hub.active_subscriptions()).await;
}

#[tokio::test]
async fn rapid_switching_ends_on_last_pod() {
    let memory = Arc::new(MemoryBackend::new());
    let backend: DynBackend = memory.clone();
    let (user, p) = person(&backend, "p").await;

    let mut manager = PodMembershipManager::new(backend.clone(), Some(p.clone()));
    let mut pod_ids = Vec::new();
    for name in ["A", "B", "C"] {
        pod_ids.push(manager.create_pod(name, None).await.unwrap().pod.id);
    }

    let mut chat = ChatSession::new(backend.clone(), Some(user));
    let requests: Vec<_> = pod_ids.iter().map(|id| chat.bind(id.clone())).collect();
    assert_eq!(memory.hub().active_subscriptions(), 0);

    // Loads finish in reverse order; only the last binding's load applies.
    let mut applied = Vec::new();
    for request in requests.into_iter().rev() {
        let load = ChatSession::fetch_initial(&backend, request).await;
        applied.push(chat.apply_load(load).await);
    }
    assert_eq!(applied, [true, false, false]);
    assert_eq!(chat.pod().map(|pod| pod.name.as_str()), Some("C"));
    assert_eq!(memory.hub().active_subscriptions(), 1);
}
