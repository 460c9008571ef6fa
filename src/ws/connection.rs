use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::domain::message::ConnectResponse;
use crate::server::{CampusIMServer, Connection};

/// 处理新连接 / Handle new connection
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: CampusIMServer,
) -> Result<()> {
    tracing::info!("📨 New connection from: {}", peer_addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = Uuid::new_v4().to_string();

    let connection_id_clone = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                tracing::error!("Failed to send message to {}: {}", connection_id_clone, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let connection = Connection {
        connection_id: connection_id.clone(),
        uid: None,
        addr: peer_addr,
        sender: tx,
        last_heartbeat: Arc::new(parking_lot::Mutex::new(Instant::now())),
    };
    server.registry.insert(connection);
    tracing::info!("✅ Connection {} opened from {}", connection_id, peer_addr);

    let welcome = ConnectResponse {
        status: "connected".to_string(),
        message: "Welcome to campus-connect-im".to_string(),
    };
    server
        .send_to_connection(&connection_id, Message::Text(serde_json::to_string(&welcome)?))
        .await?;

    // 鉴权看门狗：连接必须在deadline内完成握手，否则踢出
    // Auth watchdog: the handshake must complete within the deadline or the
    // connection is dropped
    let auth_deadline_ms = server
        .auth_config
        .as_ref()
        .map(|cfg| cfg.deadline_ms)
        .unwrap_or(1000);
    {
        let watchdog_connection = connection_id.clone();
        let watchdog_server = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(auth_deadline_ms)).await;
            let unauthenticated = watchdog_server
                .registry
                .get(&watchdog_connection)
                .map(|conn| conn.uid.is_none())
                .unwrap_or(false);
            if unauthenticated {
                let _ = watchdog_server.send_close(&watchdog_connection).await;
                watchdog_server.finalize_disconnect(&watchdog_connection).await;
                tracing::warn!(
                    "disconnecting unauthenticated connection_id={}",
                    watchdog_connection
                );
            }
        });
    }

    // 单连接事件按接收顺序处理；跨连接不保证顺序
    // Events from one connection are handled in receive order; there is no
    // cross-connection ordering guarantee
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(message) => {
                if let Err(e) = server.handle_incoming_event(message, &connection_id).await {
                    tracing::error!("Error handling event from {}: {}", connection_id, e);
                }
            }
            Err(e) => {
                tracing::error!("WebSocket error from {}: {}", connection_id, e);
                break;
            }
        }
    }

    send_task.abort();
    server.finalize_disconnect(&connection_id).await;
    tracing::info!("👋 Connection {} closed", connection_id);
    Ok(())
}
