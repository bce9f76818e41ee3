//! # MQTT
//!
//! Talks to the gate actuator over two topics:
//!
//! - `{base}/{device}/cmd`: outbound press commands, QoS 1
//! - `{base}/{device}/stat`: inbound status events from the device, QoS 1
//!
//! Every inbound stat event is fanned out on a broadcast bus so a request
//! currently waiting for its ack can pick it up. Independently of any waiter,
//! terminal events (`done` or `ignored`) drive the log finalizer in
//! [`crate::store`]. The waiter is only a fast path for the HTTP response;
//! the finalizer is what actually closes the pending entry, including acks
//! that arrive after the caller already timed out.

use std::time::Duration;

use mongodb::bson::DateTime;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{
    sync::broadcast::{self, Receiver, error::RecvError},
    time::{Instant, timeout_at},
};
use tracing::{debug, error, info, warn};

use crate::{config::Config, error::AppError, store::Store};

/// Status payload as the device publishes it. Unknown telemetry fields are
/// dropped; everything here is optional because firmware versions differ.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatPayload {
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub info: Option<String>,
    pub rssi: Option<i64>,
    pub uptime_s: Option<i64>,
    pub ip: Option<String>,
    pub heap: Option<i64>,
    /// Device clock, epoch seconds.
    pub ts: Option<i64>,
}

/// One inbound stat event, stamped with the server receive time.
#[derive(Clone, Debug)]
pub struct AckEvent {
    pub topic: String,
    pub device_id: String,
    pub payload: StatPayload,
    pub received_at: DateTime,
}

impl AckEvent {
    /// Whether the device reported a final verdict for a press command.
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload.status.as_deref(), Some("done") | Some("ignored"))
    }

    /// Device-reported time when present, receive time otherwise.
    pub fn event_millis(&self) -> i64 {
        match self.payload.ts {
            Some(ts) => ts * 1000,
            None => self.received_at.timestamp_millis(),
        }
    }
}

pub struct GateClient {
    client: AsyncClient,
    bus: broadcast::Sender<AckEvent>,
    topic_cmd: String,
}

impl GateClient {
    /// Connects the MQTT client and spawns its event loop. The loop
    /// resubscribes on every reconnect and keeps running for the lifetime of
    /// the process.
    pub fn spawn(config: &Config, store: Store) -> Self {
        let mut options = MqttOptions::new("gate-server", &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        if !config.mqtt_user.is_empty() {
            options.set_credentials(&config.mqtt_user, &config.mqtt_pass);
        }

        if config.mqtt_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let (bus, _) = broadcast::channel(64);

        let topic_cmd = format!("{}/{}/cmd", config.topic_base, config.device_id);
        let topic_stat = format!("{}/{}/stat", config.topic_base, config.device_id);

        let gate = Self {
            client: client.clone(),
            bus: bus.clone(),
            topic_cmd,
        };

        let device_id = config.device_id.clone();
        let match_window_s = config.match_window_s;

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected, subscribing to {topic_stat}");

                        if let Err(e) = client.subscribe(&topic_stat, QoS::AtLeastOnce).await {
                            error!("MQTT subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload: StatPayload = match serde_json::from_slice(&publish.payload) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("Unparseable stat payload on {}: {e}", publish.topic);
                                continue;
                            }
                        };

                        let event = AckEvent {
                            topic: publish.topic.clone(),
                            device_id: payload
                                .device_id
                                .clone()
                                .unwrap_or_else(|| device_id.clone()),
                            payload,
                            received_at: DateTime::now(),
                        };

                        // waiters come and go, no receivers is fine
                        let _ = bus.send(event.clone());

                        if !event.is_terminal() {
                            continue;
                        }

                        match store.close_pending(&event, match_window_s).await {
                            Ok(Some(log)) => debug!("Closed gate log {}", log.id.to_hex()),
                            Ok(None) => debug!("No pending gate log for ack on {}", event.topic),
                            Err(e) => error!("Failed to close gate log: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {e}, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        gate
    }

    /// Every subscriber sees every stat event from subscription on.
    pub fn subscribe_acks(&self) -> Receiver<AckEvent> {
        self.bus.subscribe()
    }

    /// Publishes a press command for the given (already clamped) duration.
    pub async fn press(&self, ms: i64) -> Result<(), AppError> {
        let payload = json!({"action": "press", "ms": ms});

        self.client
            .publish(&self.topic_cmd, QoS::AtLeastOnce, false, payload.to_string())
            .await?;

        Ok(())
    }
}

/// First terminal ack for `device_id` not older than `since_millis`, or None
/// on timeout. Events from other devices, non-terminal chatter and acks that
/// predate the request are skipped; the deadline stays fixed while skipping.
pub async fn wait_for_ack(
    mut acks: Receiver<AckEvent>,
    device_id: &str,
    since_millis: i64,
    timeout: Duration,
) -> Option<AckEvent> {
    let deadline = Instant::now() + timeout;

    loop {
        let event = match timeout_at(deadline, acks.recv()).await {
            Err(_) => return None,
            Ok(Err(RecvError::Closed)) => return None,
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!("Ack listener lagged, skipped {skipped} events");
                continue;
            }
            Ok(Ok(event)) => event,
        };

        if event.device_id != device_id || !event.is_terminal() {
            continue;
        }

        // stale ack from an earlier request
        if event.event_millis() < since_millis {
            continue;
        }

        return Some(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mongodb::bson::DateTime;
    use tokio::sync::broadcast;

    use super::{AckEvent, StatPayload, wait_for_ack};

    fn event(device_id: &str, status: &str, ts: Option<i64>) -> AckEvent {
        AckEvent {
            topic: "lar/gate01/stat".to_string(),
            device_id: device_id.to_string(),
            payload: StatPayload {
                status: Some(status.to_string()),
                ts,
                ..Default::default()
            },
            received_at: DateTime::now(),
        }
    }

    #[test]
    fn parses_device_telemetry() {
        let payload: StatPayload = serde_json::from_str(
            r#"{"deviceId":"gate01","status":"done","info":"pulse 300ms","rssi":-61,"uptime_s":4212,"ip":"10.0.0.7","heap":21432,"ts":1722980000}"#,
        )
        .unwrap();

        assert_eq!(payload.device_id.as_deref(), Some("gate01"));
        assert_eq!(payload.rssi, Some(-61));
        assert_eq!(payload.ts, Some(1_722_980_000));
    }

    #[test]
    fn tolerates_sparse_payloads() {
        let payload: StatPayload = serde_json::from_str(r#"{"status":"ignored"}"#).unwrap();

        assert_eq!(payload.status.as_deref(), Some("ignored"));
        assert!(payload.ts.is_none());
        assert!(payload.device_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn matches_first_terminal_ack_for_the_device() {
        let (bus, acks) = broadcast::channel(16);

        bus.send(event("gate01", "online", Some(20))).unwrap();
        bus.send(event("gate02", "done", Some(20))).unwrap();
        bus.send(event("gate01", "done", Some(20))).unwrap();

        let ack = wait_for_ack(acks, "gate01", 10_000, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(ack.device_id, "gate01");
        assert_eq!(ack.payload.status.as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_acks_older_than_the_request() {
        let (bus, acks) = broadcast::channel(16);

        // ts 5s -> 5_000 ms, request was at 10_000 ms
        bus.send(event("gate01", "done", Some(5))).unwrap();

        let ack = wait_for_ack(acks, "gate01", 10_000, Duration::from_millis(50)).await;

        assert!(ack.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_counts_as_terminal() {
        let (bus, acks) = broadcast::channel(16);

        bus.send(event("gate01", "ignored", Some(20))).unwrap();

        let ack = wait_for_ack(acks, "gate01", 10_000, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(ack.payload.status.as_deref(), Some("ignored"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_a_matching_ack() {
        let (_bus, acks) = broadcast::channel::<AckEvent>(16);

        let ack = wait_for_ack(acks, "gate01", 0, Duration::from_millis(50)).await;

        assert!(ack.is_none());
    }
}
