//! The dashboard-facing push channel: a WebSocket endpoint that broadcasts
//! the live snapshot every 100 ms and answers small JSON control commands on
//! the same socket. Every reply is a serialized copy; nothing hands out live
//! references to session state.

use crate::config::Settings;
use crate::AppState;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

pub const BROADCAST_INTERVAL_MS: u64 = 100;

pub async fn run(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("WebSocket server started at ws://localhost:{}", port);

    let (broadcast_tx, _) = broadcast::channel::<String>(16);
    tokio::spawn(broadcast_loop(state.clone(), broadcast_tx.clone()));

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_client(
            state.clone(),
            stream,
            broadcast_tx.subscribe(),
            peer,
        ));
    }
}

async fn broadcast_loop(state: Arc<AppState>, tx: broadcast::Sender<String>) {
    let mut interval = tokio::time::interval(Duration::from_millis(BROADCAST_INTERVAL_MS));
    loop {
        interval.tick().await;
        if state.paused.load(Ordering::Relaxed) {
            continue; // snapshots stay frozen while paused
        }
        if tx.receiver_count() == 0 {
            continue;
        }
        let _ = tx.send(live_snapshot(&state));
    }
}

fn live_snapshot(state: &AppState) -> String {
    let users = state.session.lock().unwrap().users.snapshot();
    json!({ "code": 0, "user": users }).to_string()
}

async fn handle_client(
    state: Arc<AppState>,
    stream: TcpStream,
    mut push_rx: broadcast::Receiver<String>,
    peer: SocketAddr,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    log::info!("WebSocket client connected: {}", peer);

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_command(&state, text.as_str());
                        if sink.send(Message::text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("WebSocket read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            push = push_rx.recv() => {
                match push {
                    Ok(payload) => {
                        if sink.send(Message::text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("WebSocket client {} lagged {} updates", peer, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    log::info!("WebSocket client disconnected: {}", peer);
}

/// One JSON command in, one JSON reply out.
fn handle_command(state: &AppState, text: &str) -> String {
    let request: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return json!({ "code": 1, "msg": "Invalid request" }).to_string(),
    };
    let cmd = request.get("cmd").and_then(Value::as_str).unwrap_or_default();

    let reply = match cmd {
        "data" => {
            let users = state.session.lock().unwrap().users.snapshot();
            json!({ "code": 0, "user": users })
        }
        "clear" => {
            let mut session = state.session.lock().unwrap();
            session.archive_session(&state.history);
            session.users.clear_all();
            log::info!("Statistics have been cleared!");
            json!({ "code": 0, "msg": "Statistics have been cleared!" })
        }
        "pause" => {
            let paused = request
                .get("paused")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            state.paused.store(paused, Ordering::Relaxed);
            let msg = if paused {
                "Statistics paused!"
            } else {
                "Statistics resumed!"
            };
            log::info!("{}", msg);
            json!({ "code": 0, "msg": msg, "paused": paused })
        }
        "getPause" => {
            json!({ "code": 0, "paused": state.paused.load(Ordering::Relaxed) })
        }
        "getSettings" => {
            let settings = state.settings.lock().unwrap().clone();
            json!({ "code": 0, "settings": settings })
        }
        "setSettings" => match request
            .get("settings")
            .cloned()
            .map(serde_json::from_value::<Settings>)
        {
            Some(Ok(settings)) => {
                *state.settings.lock().unwrap() = settings.clone();
                state.save_settings(&settings);
                json!({ "code": 0, "settings": settings })
            }
            _ => json!({ "code": 1, "msg": "Invalid settings" }),
        },
        "skills" => {
            let uid = request.get("uid").and_then(Value::as_u64).unwrap_or(0);
            let data = state.session.lock().unwrap().users.user_skill_data(uid);
            match data {
                Some(data) => json!({ "code": 0, "data": data }),
                None => json!({ "code": 1, "msg": "User not found" }),
            }
        }
        "enemies" => {
            let enemies = state.session.lock().unwrap().users.enemies_snapshot();
            json!({ "code": 0, "enemies": enemies })
        }
        _ => json!({ "code": 1, "msg": "Unknown command" }),
    };
    reply.to_string()
}
