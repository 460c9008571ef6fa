use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;

mod config;
mod domain;
mod error;
mod server;
mod service;
mod storage;
mod tasks;
mod ws;

use server::CampusIMServer;
use service::auth::{AuthProvider, LocalAuthProvider, RemoteAuthProvider};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "campus-connect-im WebSocket messaging server", long_about = None)]
struct Args {
    /// 配置文件路径（TOML）/ Config file path (TOML)
    #[arg(short = 'c', long = "config", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load(&args.config)?;

    // 身份解析是外部协作方；关闭时使用本地放行实现
    // Identity resolution is an external collaborator; the permissive local
    // implementation is used when disabled
    let auth: Arc<dyn AuthProvider> = if cfg.auth.enabled {
        Arc::new(RemoteAuthProvider::new(
            cfg.auth.center_url.clone(),
            cfg.auth.timeout_ms,
        ))
    } else {
        Arc::new(LocalAuthProvider)
    };

    let server = Arc::new(
        CampusIMServer::new()
            .with_auth_provider(auth)
            .with_auth_config(cfg.auth.clone()),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tasks::heartbeat::spawn_cleanup_task(
        server.clone(),
        cfg.server.heartbeat_timeout_ms,
        shutdown_rx,
    );

    server.run(cfg.server.host.clone(), cfg.server.ws_port).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::ChatEvent;
    use crate::server::presence::PresenceStatus;
    use crate::server::Connection;
    use crate::storage::Store;
    use serde_json::json;
    use std::time::Instant;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn open_connection(
        server: &CampusIMServer,
        connection_id: &str,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        server.registry.insert(Connection {
            connection_id: connection_id.to_string(),
            uid: None,
            addr: "127.0.0.1:0".parse().unwrap(),
            sender: tx,
            last_heartbeat: Arc::new(parking_lot::Mutex::new(Instant::now())),
        });
        rx
    }

    async fn connect_user(
        server: &CampusIMServer,
        connection_id: &str,
        uid: &str,
    ) -> mpsc::UnboundedReceiver<Message> {
        let rx = open_connection(server, connection_id);
        send(
            server,
            connection_id,
            ChatEvent::new("auth", json!({"uid": uid, "token": "t"})),
        )
        .await;
        rx
    }

    async fn send(server: &CampusIMServer, connection_id: &str, event: ChatEvent) {
        server
            .handle_incoming_event(Message::Text(event.to_text().unwrap()), connection_id)
            .await
            .unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                if let Ok(event) = serde_json::from_str::<ChatEvent>(&text) {
                    events.push(event);
                }
            }
        }
        events
    }

    fn find<'a>(events: &'a [ChatEvent], name: &str) -> Option<&'a ChatEvent> {
        events.iter().find(|e| e.event == name)
    }

    #[tokio::test]
    async fn first_connection_sets_user_online() {
        let server = CampusIMServer::new();
        let _rx = connect_user(&server, "c1", "uA").await;
        assert_eq!(server.presence.status_of("uA"), PresenceStatus::Online);
    }

    #[tokio::test]
    async fn status_survives_until_last_disconnect() {
        let server = CampusIMServer::new();
        let _rx1 = connect_user(&server, "c1", "uA").await;
        let _rx2 = connect_user(&server, "c2", "uA").await;

        server.finalize_disconnect("c1").await;
        assert_eq!(server.presence.status_of("uA"), PresenceStatus::Online);

        server.finalize_disconnect("c2").await;
        assert_eq!(server.presence.status_of("uA"), PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn message_reaches_both_recipient_devices() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        let mut b_rx1 = connect_user(&server, "cB1", "uB").await;
        let mut b_rx2 = connect_user(&server, "cB2", "uB").await;
        drain(&mut a_rx);
        drain(&mut b_rx1);
        drain(&mut b_rx2);

        send(
            &server,
            "cA",
            ChatEvent::new(
                "message",
                json!({"recipient_id": "uB", "content": "hello", "temp_id": "t-1"}),
            ),
        )
        .await;

        for rx in [&mut b_rx1, &mut b_rx2] {
            let events = drain(rx);
            let msg = find(&events, "message").expect("recipient device got the message");
            assert_eq!(msg.data["is_own_message"], json!(false));
            assert_eq!(msg.data["content"], json!("hello"));
        }

        let a_events = drain(&mut a_rx);
        let echo = find(&a_events, "message").expect("sender got the echo");
        assert_eq!(echo.data["is_own_message"], json!(true));
        assert_eq!(echo.data["temp_id"], json!("t-1"));
    }

    #[tokio::test]
    async fn offline_recipient_gets_persisted_message_and_notification() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);

        // A在线，B离线 / A online, B offline
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;

        let a_events = drain(&mut a_rx);
        let echo = find(&a_events, "message").expect("sender got the echo");
        assert_eq!(echo.data["is_own_message"], json!(true));
        let message_id = echo.data["message_id"].as_str().unwrap().to_string();

        let stored = server
            .storage
            .find_message(&message_id)
            .await
            .unwrap()
            .expect("message persisted");
        assert!(!stored.is_read);

        let notifications = server.storage.unread_notifications("uB", 50).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].related_id, message_id);
        let meta = notifications[0].metadata.as_ref().unwrap();
        assert_eq!(meta.message_preview, "hi");
        assert_eq!(meta.sender_id, "uA");
    }

    #[tokio::test]
    async fn notification_fallback_is_idempotent() {
        let server = CampusIMServer::new();
        let record = crate::storage::MessageRecord {
            message_id: "m-dup".to_string(),
            channel_id: None,
            sender_id: "uA".to_string(),
            recipient_id: "uB".to_string(),
            content: "once".to_string(),
            attachments: vec![],
            is_read: false,
            sent_at: chrono::Utc::now(),
            read_at: None,
        };
        server.notify_if_unreachable(&record).await.unwrap();
        server.notify_if_unreachable(&record).await.unwrap();
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn active_recipient_still_gets_notification() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        let mut b_rx = connect_user(&server, "cB", "uB").await;

        // B离开会话 -> active，不看这个会话也要收到通知
        // B leaves the conversation -> active; away from this conversation
        // means a notification is still due
        send(&server, "cB", ChatEvent::new("leave_chat", json!({}))).await;
        assert_eq!(server.presence.status_of("uB"), PresenceStatus::Active);
        drain(&mut a_rx);
        drain(&mut b_rx);

        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "ping"})),
        )
        .await;

        let b_events = drain(&mut b_rx);
        assert!(find(&b_events, "message").is_some());
        let notify = find(&b_events, "new_notification").expect("unread count pushed");
        assert_eq!(notify.data["count"], json!(1));
    }

    #[tokio::test]
    async fn online_recipient_suppresses_notification() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        let _b_rx = connect_user(&server, "cB", "uB").await;
        drain(&mut a_rx);

        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "seen live"})),
        )
        .await;

        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn second_device_does_not_clear_notification() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            1
        );

        // B上线新设备不自动清掉通知 / A fresh device login must not clear it
        let _b_rx = connect_user(&server, "cB2", "uB").await;
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn mark_read_round_trip_updates_message_and_notification() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;
        let a_events = drain(&mut a_rx);
        let message_id = find(&a_events, "message").unwrap().data["message_id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut b_rx = connect_user(&server, "cB", "uB").await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        send(
            &server,
            "cB",
            ChatEvent::new("mark_read", json!({"message_ids": [message_id]})),
        )
        .await;

        let stored = server
            .storage
            .find_message(&message_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_read);
        assert!(stored.read_at.is_some());
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            0
        );

        // 发送者收到逐条read事件 / The sender gets a per-message read event
        let a_events = drain(&mut a_rx);
        let read = find(&a_events, "read").expect("sender notified of read");
        assert_eq!(read.data["message_id"], json!(message_id));
        assert_eq!(read.data["read_by"], json!("uB"));

        // 读者收到带计数的确认 / The reader gets a counted ack
        let b_events = drain(&mut b_rx);
        let ack = find(&b_events, "read").unwrap();
        assert_eq!(ack.data["confirmed"], json!(true));
        assert_eq!(ack.data["modified"], json!(1));
    }

    #[tokio::test]
    async fn mark_read_ignores_foreign_messages() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;
        let a_events = drain(&mut a_rx);
        let message_id = find(&a_events, "message").unwrap().data["message_id"]
            .as_str()
            .unwrap()
            .to_string();

        // C不是接收者，静默跳过并回报零计数 / C is not the recipient; skipped
        // silently with zero counts
        let mut c_rx = connect_user(&server, "cC", "uC").await;
        drain(&mut a_rx);
        drain(&mut c_rx);
        send(
            &server,
            "cC",
            ChatEvent::new("mark_read", json!({"message_ids": [message_id]})),
        )
        .await;

        let c_events = drain(&mut c_rx);
        let ack = find(&c_events, "read").unwrap();
        assert_eq!(ack.data["matched"], json!(0));
        assert_eq!(ack.data["modified"], json!(0));

        let stored = server
            .storage
            .find_message(&message_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_read);
        assert!(find(&drain(&mut a_rx), "read").is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_notification_and_notifies_recipient() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;
        let a_events = drain(&mut a_rx);
        let message_id = find(&a_events, "message").unwrap().data["message_id"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            1
        );

        let mut b_rx = connect_user(&server, "cB", "uB").await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("delete_message", json!({"message_id": message_id})),
        )
        .await;

        assert!(server
            .storage
            .find_message(&message_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            0
        );

        let b_events = drain(&mut b_rx);
        let deleted = find(&b_events, "delete").expect("recipient got delete event");
        assert_eq!(deleted.data["message_id"], json!(message_id));

        let a_events = drain(&mut a_rx);
        assert_eq!(
            find(&a_events, "delete").unwrap().data["confirmed"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn only_the_sender_may_delete() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;
        let a_events = drain(&mut a_rx);
        let message_id = find(&a_events, "message").unwrap().data["message_id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut c_rx = connect_user(&server, "cC", "uC").await;
        drain(&mut c_rx);
        send(
            &server,
            "cC",
            ChatEvent::new("delete_message", json!({"message_id": message_id})),
        )
        .await;

        let c_events = drain(&mut c_rx);
        let err = find(&c_events, "error").expect("foreign delete rejected");
        assert_eq!(err.data["event"], json!("delete"));
        assert!(server
            .storage
            .find_message(&message_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn empty_message_is_rejected_with_temp_id() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);

        send(
            &server,
            "cA",
            ChatEvent::new(
                "message",
                json!({"recipient_id": "uB", "content": "", "attachments": [], "temp_id": "t-9"}),
            ),
        )
        .await;

        let a_events = drain(&mut a_rx);
        let err = find(&a_events, "error").expect("validation error reported");
        assert_eq!(err.data["event"], json!("message"));
        assert_eq!(err.data["temp_id"], json!("t-9"));
    }

    #[tokio::test]
    async fn typing_is_relayed_to_recipient_only() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        let mut b_rx = connect_user(&server, "cB", "uB").await;
        let mut c_rx = connect_user(&server, "cC", "uC").await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        send(
            &server,
            "cA",
            ChatEvent::new("typing", json!({"recipient_id": "uB", "status": "start"})),
        )
        .await;

        let b_events = drain(&mut b_rx);
        let typing = find(&b_events, "typing").expect("recipient saw typing");
        assert_eq!(typing.data["user_id"], json!("uA"));
        assert_eq!(typing.data["status"], json!("start"));
        assert!(find(&drain(&mut c_rx), "typing").is_none());

        // 缺少接收者是no-op而不是错误 / A missing recipient is a no-op, not an error
        send(&server, "cA", ChatEvent::new("typing", json!({"status": "stop"}))).await;
        assert!(find(&drain(&mut a_rx), "error").is_none());
    }

    #[tokio::test]
    async fn join_and_leave_broadcast_presence() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        let mut b_rx = connect_user(&server, "cB", "uB").await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        send(
            &server,
            "cB",
            ChatEvent::new("join_chat", json!({"friend_id": "uA"})),
        )
        .await;
        assert_eq!(server.presence.status_of("uB"), PresenceStatus::Online);
        assert_eq!(
            server.presence.record_of("uB").unwrap().viewing.as_deref(),
            Some("uA")
        );

        // 其他用户收到定向presence事件，全员收到全量状态图
        // Other users get the point-to-point presence event; everyone gets
        // the full map
        let a_events = drain(&mut a_rx);
        assert!(find(&a_events, "get_online_users").is_some());
        let online = find(&a_events, "online_user").expect("peer presence event");
        assert_eq!(online.data["user_id"], json!("uB"));
        assert_eq!(online.data["status"], json!("online"));

        let b_events = drain(&mut b_rx);
        assert!(find(&b_events, "get_online_users").is_some());
        assert!(find(&b_events, "online_user").is_none());

        send(&server, "cB", ChatEvent::new("leave_chat", json!({}))).await;
        assert_eq!(server.presence.status_of("uB"), PresenceStatus::Active);
        let a_events = drain(&mut a_rx);
        let online = find(&a_events, "online_user").unwrap();
        assert_eq!(online.data["status"], json!("active"));
    }

    #[tokio::test]
    async fn notifications_are_listed_and_marked_by_id() {
        let server = CampusIMServer::new();
        let mut a_rx = connect_user(&server, "cA", "uA").await;
        drain(&mut a_rx);
        send(
            &server,
            "cA",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;

        let mut b_rx = connect_user(&server, "cB", "uB").await;
        drain(&mut b_rx);
        send(&server, "cB", ChatEvent::new("get_notifications", json!({}))).await;

        let b_events = drain(&mut b_rx);
        let listing = find(&b_events, "notifications").expect("unread listing");
        assert_eq!(listing.data["count"], json!(1));
        let notification_id = listing.data["notifications"][0]["notification_id"]
            .as_str()
            .unwrap()
            .to_string();

        send(
            &server,
            "cB",
            ChatEvent::new(
                "mark_notifications_read",
                json!({"notification_ids": [notification_id]}),
            ),
        )
        .await;
        let b_events = drain(&mut b_rx);
        let ack = find(&b_events, "notifications_marked_read").unwrap();
        assert_eq!(ack.data["modified"], json!(1));
        assert_eq!(
            server.storage.count_unread_notifications("uB").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn unauthenticated_events_are_rejected() {
        let server = CampusIMServer::new();
        let mut rx = open_connection(&server, "c1");

        send(
            &server,
            "c1",
            ChatEvent::new("message", json!({"recipient_id": "uB", "content": "hi"})),
        )
        .await;

        let events = drain(&mut rx);
        let err = find(&events, "error").expect("unauthenticated send rejected");
        assert_eq!(err.data["event"], json!("message"));
    }

    #[tokio::test]
    async fn unknown_event_type_reports_error() {
        let server = CampusIMServer::new();
        let mut rx = connect_user(&server, "c1", "uA").await;
        drain(&mut rx);

        send(&server, "c1", ChatEvent::new("wibble", json!({}))).await;
        let events = drain(&mut rx);
        let err = find(&events, "error").unwrap();
        assert_eq!(err.data["event"], json!("wibble"));
    }
}
