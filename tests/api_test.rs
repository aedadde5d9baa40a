use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use pod::backend::{RealtimeHub, SqliteBackend};
use pod::config::Config;
use pod::state::AppState;
use pod::{db, routes};

struct TestApp {
    app: Router,
    _tmp: TempDir,
}

impl TestApp {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let mut config = Config::default();
        config.auth.bcrypt_cost = 4;

        let backend = Arc::new(SqliteBackend::new(pool, RealtimeHub::default()));
        Self {
            app: routes::router(AppState::new(backend, config)),
            _tmp: tmp,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn sign_up(&self, email: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({ "email": email, "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    /// Signed-up user with a profile. Returns (token, profile id).
    async fn member(&self, username: &str) -> (String, String) {
        let token = self.sign_up(&format!("{username}@example.com")).await;
        let (status, profile) = self
            .call(
                Method::POST,
                "/profile",
                Some(&token),
                Some(json!({ "username": username })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{profile}");
        (token, profile["id"].as_str().unwrap().to_string())
    }
}

#[tokio::test]
async fn health_is_ok() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn signup_sets_session_cookie() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "email": "sam@example.com", "password": "correct horse" }).to_string(),
        ))
        .unwrap();

    let response = app.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("pod_session="));

    // The cookie alone authenticates.
    let token = cookie
        .trim_start_matches("pod_session=")
        .split(';')
        .next()
        .unwrap();
    let request = Request::builder()
        .uri("/profile")
        .header(header::COOKIE, format!("pod_session={token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.app.clone().oneshot(request).await.unwrap();
    // Signed in, but no profile yet.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_and_logout() {
    let app = TestApp::new();
    app.sign_up("sam@example.com").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "SAM@example.com", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "SAM@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, _) = app.call(Method::POST, "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.call(Method::GET, "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_validation() {
    let app = TestApp::new();
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({ "email": "sam@example.com", "password": "short" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.sign_up("sam@example.com").await;
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({ "email": "Sam@Example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_lifecycle() {
    let app = TestApp::new();
    let (status, _) = app.call(Method::GET, "/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (token, id) = app.member("sam").await;
    let (status, profile) = app.call(Method::GET, "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["id"], id.as_str());
    assert_eq!(profile["username"], "sam");

    let (status, updated) = app
        .call(
            Method::PUT,
            "/profile",
            Some(&token),
            Some(json!({
                "username": "sam",
                "bio": "  likes board games ",
                "gender": "non_binary",
                "relationship_status": "its_complicated"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["bio"], "likes board games");
    assert_eq!(updated["gender"], "non_binary");

    let (status, _) = app
        .call(Method::POST, "/profile", Some(&token), Some(json!({ "username": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let app = TestApp::new();
    app.member("sam").await;
    let token = app.sign_up("other@example.com").await;

    let (status, _) = app
        .call(Method::POST, "/profile", Some(&token), Some(json!({ "username": "sam" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn creating_a_pod_needs_a_profile() {
    let app = TestApp::new();
    let token = app.sign_up("sam@example.com").await;

    let (status, body) = app
        .call(Method::POST, "/pods", Some(&token), Some(json!({ "name": "Dinner Club" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Please sign in and create a profile first");
}

#[tokio::test]
async fn pods_create_list_and_join() {
    let app = TestApp::new();
    let (p_token, p_id) = app.member("p").await;
    let (q_token, q_id) = app.member("q").await;

    let (status, created) = app
        .call(
            Method::POST,
            "/pods",
            Some(&p_token),
            Some(json!({ "name": "Dinner Club", "description": "Fridays" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["is_member"], true);
    let pod_id = created["id"].as_str().unwrap().to_string();

    let (_, listed) = app.call(Method::GET, "/pods", Some(&q_token), None).await;
    let pods = listed.as_array().unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0]["name"], "Dinner Club");
    assert_eq!(pods[0]["members"].as_array().unwrap().len(), 1);
    assert_eq!(pods[0]["members"][0]["id"], p_id.as_str());
    assert_eq!(pods[0]["is_member"], false);

    let join = format!("/pods/{pod_id}/join");
    let (status, body) = app.call(Method::POST, &join, Some(&q_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "joined");

    let (status, body) = app.call(Method::POST, &join, Some(&q_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_member");

    let (_, listed) = app.call(Method::GET, "/pods", Some(&q_token), None).await;
    let members: Vec<&str> = listed[0]["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(members, [p_id.as_str(), q_id.as_str()]);
    assert_eq!(listed[0]["is_member"], true);

    // Anonymous viewers see pods but are members of none.
    let (status, listed) = app.call(Method::GET, "/pods", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["is_member"], false);
}

#[tokio::test]
async fn joining_an_unknown_pod_is_not_found() {
    let app = TestApp::new();
    let (token, _) = app.member("p").await;
    let (status, _) = app
        .call(Method::POST, "/pods/nope/join", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn messages_history_marks_own() {
    let app = TestApp::new();
    let (p_token, p_id) = app.member("p").await;
    let (q_token, _) = app.member("q").await;
    let (_, created) = app
        .call(Method::POST, "/pods", Some(&p_token), Some(json!({ "name": "Dinner Club" })))
        .await;
    let messages = format!("/pods/{}/messages", created["id"].as_str().unwrap());

    let (status, sent) = app
        .call(Method::POST, &messages, Some(&p_token), Some(json!({ "content": " hi " })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["content"], "hi");
    assert_eq!(sent["sender_id"], p_id.as_str());

    let (status, _) = app
        .call(Method::POST, &messages, Some(&p_token), Some(json!({ "content": "   " })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, history) = app.call(Method::GET, &messages, Some(&q_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["pod"]["name"], "Dinner Club");
    let entries = history["messages"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["message"]["content"], "hi");
    assert_eq!(entries[0]["message"]["sender"]["username"], "p");
    assert_eq!(entries[0]["own"], false);

    let (_, history) = app.call(Method::GET, &messages, Some(&p_token), None).await;
    assert_eq!(history["messages"][0]["own"], true);
}

#[tokio::test]
async fn messages_of_unknown_pod_are_not_found() {
    let app = TestApp::new();
    let (token, _) = app.member("p").await;
    let (status, _) = app
        .call(Method::GET, "/pods/nope/messages", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(
            Method::POST,
            "/pods/nope/messages",
            Some(&token),
            Some(json!({ "content": "hi" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
