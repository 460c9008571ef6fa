use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::server::CampusIMServer;

impl CampusIMServer {
    /// 清理超时连接 / Clean up timed-out connections
    pub async fn cleanup_timeout_connections(&self, timeout_ms: u64) {
        let mut stale = Vec::new();
        for entry in self.registry.connections.iter() {
            if entry.value().last_heartbeat.lock().elapsed().as_millis() > timeout_ms as u128 {
                stale.push(entry.key().clone());
            }
        }
        for connection_id in stale {
            let _ = self.send_close(&connection_id).await;
            self.finalize_disconnect(&connection_id).await;
            info!("🧹 Cleaned up timed-out connection: {}", connection_id);
        }
    }
}

/// 周期性清理任务，收到shutdown信号即退出 / Periodic cleanup task honoring shutdown
pub fn spawn_cleanup_task(
    server: Arc<CampusIMServer>,
    timeout_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let cleanup_interval_ms = if timeout_ms <= 1000 {
            timeout_ms / 2
        } else if timeout_ms <= 10000 {
            1000
        } else {
            5000
        };
        info!(
            "⏰ Cleanup interval set to {}ms for timeout {}ms",
            cleanup_interval_ms, timeout_ms
        );
        let mut cleanup_interval = interval(Duration::from_millis(cleanup_interval_ms));
        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    server.cleanup_timeout_connections(timeout_ms).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    });
}
