use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::backend::{DynBackend, MessageWithSender, Pod, PodId, UserId};
use crate::chat::{post_message, ChatEntry, ChatSession, LoadRequest, Notice};
use crate::error::{AppResult, PodError};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::routes::pods::viewer_profile;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct HistoryResponse<'a> {
    pub pod: &'a Pod,
    pub messages: Vec<ChatEntry<'a>>,
}

/// Frames pushed to the client.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Snapshot {
        pod: Option<&'a Pod>,
        messages: Vec<ChatEntry<'a>>,
    },
    Message {
        message: &'a MessageWithSender,
        own: bool,
    },
    Notice(&'a Notice),
}

/// Frames accepted from the client.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Send { content: String },
    Switch { pod_id: PodId },
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pods/{id}/messages", get(history).post(send))
        .route("/pods/{id}/ws", get(chat_ws))
}

/// GET /pods/{id}/messages
pub async fn history(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(pod_id): Path<PodId>,
) -> AppResult<Response> {
    let request = LoadRequest {
        generation: 0,
        pod_id,
        user_id: user.map(|u| u.id),
    };
    let load = ChatSession::fetch_initial(&state.backend, request).await;

    let pod = load
        .pod
        .map_err(PodError::fetch("pod details"))?
        .ok_or(PodError::NotFound("Pod"))?;
    let messages = load.messages.map_err(PodError::fetch("messages"))?;
    let viewer = load.profile.unwrap_or_else(|e| {
        tracing::error!("Error fetching profile: {}", e);
        None
    });

    let entries = messages
        .iter()
        .map(|message| ChatEntry {
            message,
            own: viewer
                .as_ref()
                .is_some_and(|profile| profile.id == message.sender.id),
        })
        .collect();

    Ok(Json(HistoryResponse {
        pod: &pod,
        messages: entries,
    })
    .into_response())
}

/// POST /pods/{id}/messages. Blank content is accepted and ignored.
pub async fn send(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(pod_id): Path<PodId>,
    Json(req): Json<SendRequest>,
) -> AppResult<Response> {
    let profile = viewer_profile(&state, Some(&user))
        .await?
        .ok_or(PodError::Unauthenticated)?;

    match post_message(&state.backend, &pod_id, &profile, &req.content).await? {
        Some(message) => Ok((StatusCode::CREATED, Json(message)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// GET /pods/{id}/ws
pub async fn chat_ws(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(pod_id): Path<PodId>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let backend = state.backend.clone();
    let user_id = user.map(|u| u.id);
    ws.on_upgrade(move |socket| run_chat(socket, backend, user_id, pod_id))
}

type Sink = SplitSink<WebSocket, WsMessage>;

async fn run_chat(socket: WebSocket, backend: DynBackend, user_id: Option<UserId>, pod_id: PodId) {
    let (mut sink, mut stream) = socket.split();
    let mut session = ChatSession::new(backend.clone(), user_id);

    session.open(pod_id).await;
    if send_snapshot(&mut sink, &mut session).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!("websocket receive failed: {}", e);
                        break;
                    }
                };

                let frame: ClientFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!("ignoring malformed frame: {}", e);
                        continue;
                    }
                };

                let sent = match frame {
                    ClientFrame::Send { content } => {
                        match session.send_message(&content).await {
                            Ok(Some(_)) => Ok(()),
                            Ok(None) if session.profile().is_none() && !content.trim().is_empty() => {
                                send_frame(&mut sink, &ServerFrame::Notice(&Notice::info(
                                    "Create a profile to chat",
                                )))
                                .await
                            }
                            Ok(None) => Ok(()),
                            Err(e) => {
                                send_frame(&mut sink, &ServerFrame::Notice(&Notice::error(e.to_string())))
                                    .await
                            }
                        }
                    }
                    ClientFrame::Switch { pod_id } => {
                        session.open(pod_id).await;
                        send_snapshot(&mut sink, &mut session).await
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
            Some(notification) = session.next_notification() => {
                let arrival = ChatSession::resolve_notification(&backend, notification).await;
                let appended = session.apply_arrival(arrival);
                let mut sent = Ok(());
                if appended {
                    if let Some(entry) = session.entries().last() {
                        sent = send_frame(&mut sink, &ServerFrame::Message {
                            message: entry.message,
                            own: entry.own,
                        })
                        .await;
                    }
                }
                if sent.is_err() || send_notices(&mut sink, &mut session).await.is_err() {
                    break;
                }
            }
        }
    }

    session.unbind();
    tracing::debug!("chat websocket closed");
}

async fn send_snapshot(sink: &mut Sink, session: &mut ChatSession) -> Result<(), axum::Error> {
    let frame = ServerFrame::Snapshot {
        pod: session.pod(),
        messages: session.entries().collect(),
    };
    send_frame(sink, &frame).await?;
    send_notices(sink, session).await
}

async fn send_notices(sink: &mut Sink, session: &mut ChatSession) -> Result<(), axum::Error> {
    for notice in session.drain_notices() {
        send_frame(sink, &ServerFrame::Notice(&notice)).await?;
    }
    Ok(())
}

async fn send_frame(sink: &mut Sink, frame: &ServerFrame<'_>) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(WsMessage::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_are_tagged() {
        let send: ClientFrame = serde_json::from_str(r#"{"type":"send","content":"hi"}"#).unwrap();
        assert!(matches!(send, ClientFrame::Send { content } if content == "hi"));

        let switch: ClientFrame =
            serde_json::from_str(r#"{"type":"switch","pod_id":"pod-2"}"#).unwrap();
        assert!(matches!(switch, ClientFrame::Switch { pod_id } if pod_id.as_str() == "pod-2"));
    }

    #[test]
    fn notice_frame_flattens_level_and_text() {
        let notice = Notice::error("Failed to load messages");
        let value = serde_json::to_value(ServerFrame::Notice(&notice)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "notice",
                "level": "error",
                "text": "Failed to load messages"
            })
        );
    }
}
