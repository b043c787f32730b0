//! Instance identity and presence heartbeat. Each gateway process mints a
//! fresh instance id at startup and periodically refreshes its row in
//! `gateway:instances` so other instances can tell a crashed peer from a
//! slow one and garbage-collect the stale one's connection directory rows.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};
use uuid::Uuid;

use crate::state::GatewayState;
use crate::store::{by_user_key, connection_key, instance_conns_key, INSTANCES_KEY};

/// Instance rows older than this are considered stale during a cleanup
/// sweep (several heartbeat intervals, to tolerate one or two missed beats
/// before declaring an instance dead).
pub const STALE_THRESHOLD: Duration = Duration::from_secs(120);

pub fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Runs forever, writing this instance's heartbeat timestamp and sweeping
/// stale peers. The caller spawns this as a detached task; it has no
/// explicit shutdown path and ends only when the process exits.
pub async fn run_heartbeat_loop(state: Arc<GatewayState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        heartbeat_once(&state).await;
        sweep_stale_instances(&state).await;
    }
}

async fn heartbeat_once(state: &Arc<GatewayState>) {
    if let Err(e) = state
        .store
        .hset(INSTANCES_KEY, &state.instance_id, &now_millis().to_string())
        .await
    {
        warn!(instance_id = %state.instance_id, error = %e, "heartbeat write failed");
    }
}

async fn sweep_stale_instances(state: &Arc<GatewayState>) {
    let rows = match state.store.hgetall(INSTANCES_KEY).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "heartbeat sweep: failed to read instance table");
            return;
        }
    };
    let now = now_millis();
    for (instance_id, heartbeat) in rows {
        if instance_id == state.instance_id {
            continue;
        }
        let age_ms: u128 = heartbeat.parse().unwrap_or(0);
        if now.saturating_sub(age_ms) > STALE_THRESHOLD.as_millis() {
            info!(stale_instance = %instance_id, "clearing connection directory for stale instance");
            clear_instance(state, &instance_id).await;
        }
    }
}

/// Clears every connection directory row belonging to `instance_id`. This
/// is the C2 shared-half `clear-instance` operation.
pub async fn clear_instance(state: &Arc<GatewayState>, instance_id: &str) {
    let conn_ids = match state.store.smembers(&instance_conns_key(instance_id)).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(instance_id, error = %e, "clear_instance: failed to read conn set");
            return;
        }
    };
    for conn_id in &conn_ids {
        let raw = state.store.get(&connection_key(conn_id)).await.ok().flatten();
        if let Some(raw) = raw {
            if let Ok(info) = serde_json::from_str::<crate::store::ConnectionInfo>(&raw) {
                let _ = state.store.srem(&by_user_key(&info.user_id), conn_id).await;
            }
        }
        let _ = state.store.delete(&connection_key(conn_id)).await;
        state.subscriptions.unsubscribe_all(conn_id).await;
    }
    let _ = state.store.delete(&instance_conns_key(instance_id)).await;
    let _ = state.store.hdel(INSTANCES_KEY, instance_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_unique() {
        assert_ne!(new_instance_id(), new_instance_id());
    }
}
