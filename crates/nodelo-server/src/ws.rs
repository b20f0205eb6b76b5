//! WebSocket endpoint for real-time chat events.
//!
//! Each socket is registered with the [`FanOut`](crate::fanout::FanOut) and
//! receives the events of every chat room it joined. Client frames are JSON
//! objects tagged with `event`, mirroring the server events.

use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{AdminIdentity, MaybeAdmin};
use crate::engine::{MessagingEngine, ReadOrigin, Viewer};
use crate::error::ServerError;
use crate::fanout::{ConnectionId, ServerEvent};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinChat {
        chat_id: Uuid,
        user_email: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveChat { chat_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Typing {
        chat_id: Uuid,
        #[serde(default = "typing_default")]
        is_typing: bool,
        user_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StopTyping { chat_id: Uuid },
    #[serde(rename_all = "camelCase")]
    MarkRead {
        chat_id: Uuid,
        message_ids: Option<Vec<Uuid>>,
    },
}

fn typing_default() -> bool {
    true
}

const NOT_JOINED: ServerError = ServerError::PermissionDenied("Join the chat first");

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    MaybeAdmin(admin): MaybeAdmin,
) -> Response {
    ws.on_upgrade(move |socket| ws_connection(socket, state, admin))
}

async fn ws_connection(mut socket: WebSocket, state: AppState, admin: Option<AdminIdentity>) {
    let engine = state.engine.clone();
    let (conn, mut rx) = engine.fanout().connect().await;
    let mut session = Session::new(conn, admin);

    info!(conn, admin = session.is_admin(), "WebSocket connected");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(event) => session.handle(&engine, event).await.err(),
                            Err(e) => Some(ServerError::BadRequest(format!("Unrecognised event: {e}"))),
                        };
                        if let Some(err) = reply {
                            debug!(conn, error = %err, "Rejected client event");
                            let event = ServerEvent::Error { message: err.to_string() };
                            if send_event(&mut socket, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    engine.fanout().disconnect(conn).await;
    info!(conn, "WebSocket disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            debug!(error = %e, "Could not encode event");
            Ok(())
        }
    }
}

/// Per-socket state: who is connected and which chats they joined.
struct Session {
    conn: ConnectionId,
    admin: Option<AdminIdentity>,
    /// Viewer each chat was joined as, reused for read receipts.
    joined: HashMap<Uuid, Viewer>,
}

impl Session {
    fn new(conn: ConnectionId, admin: Option<AdminIdentity>) -> Self {
        Self {
            conn,
            admin,
            joined: HashMap::new(),
        }
    }

    fn is_admin(&self) -> bool {
        self.admin.is_some()
    }

    fn viewer(&self, user_email: Option<String>) -> Viewer {
        match &self.admin {
            Some(admin) => Viewer::Admin(admin.clone()),
            None => Viewer::Visitor { user_email },
        }
    }

    fn joined_as(&self, chat_id: Uuid) -> Result<&Viewer, ServerError> {
        self.joined.get(&chat_id).ok_or(NOT_JOINED)
    }

    async fn require_member(&self, engine: &MessagingEngine, chat_id: Uuid) -> Result<(), ServerError> {
        if engine.fanout().is_member(self.conn, chat_id).await {
            Ok(())
        } else {
            Err(NOT_JOINED)
        }
    }

    async fn handle(&mut self, engine: &MessagingEngine, event: ClientEvent) -> Result<(), ServerError> {
        let fanout = engine.fanout();
        match event {
            ClientEvent::JoinChat {
                chat_id,
                user_email,
            } => {
                let viewer = self.viewer(user_email);
                engine.authorize_viewer(chat_id, &viewer).await?;
                self.joined.insert(chat_id, viewer);
                fanout.join(self.conn, chat_id).await;
                let members = fanout.member_count(chat_id).await;
                debug!(conn = self.conn, chat = %chat_id, members, "Chat joined");
            }
            ClientEvent::LeaveChat { chat_id } => {
                self.joined.remove(&chat_id);
                fanout.leave(self.conn, chat_id).await;
            }
            ClientEvent::Typing {
                chat_id,
                is_typing,
                user_name,
            } => {
                self.require_member(engine, chat_id).await?;
                let user_name = match &self.admin {
                    Some(admin) => Some(admin.name.clone()),
                    None => user_name,
                };
                fanout
                    .publish_except(
                        chat_id,
                        self.conn,
                        ServerEvent::UserTyping {
                            chat_id,
                            is_typing,
                            user_name,
                        },
                    )
                    .await;
            }
            ClientEvent::StopTyping { chat_id } => {
                self.require_member(engine, chat_id).await?;
                fanout
                    .publish_except(
                        chat_id,
                        self.conn,
                        ServerEvent::UserTyping {
                            chat_id,
                            is_typing: false,
                            user_name: None,
                        },
                    )
                    .await;
            }
            ClientEvent::MarkRead {
                chat_id,
                message_ids,
            } => {
                let viewer = self.joined_as(chat_id)?;
                engine
                    .mark_read(chat_id, viewer, message_ids.as_deref(), ReadOrigin::Realtime)
                    .await?;
            }
        }
        Ok(())
    }
}
