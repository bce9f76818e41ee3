//! # Mongo
//!
//! Document store for the home. The backend owns two kinds of data here:
//!
//! - `gate_logs`: one document per gate-open attempt. Created as `sent`
//!   (pending) or `blocked_time` (rejected by the night window) and closed at
//!   most once by the ack finalizer, which flips `used` and copies the device
//!   telemetry in. An entry that never receives an ack simply stays `sent`,
//!   still visible through the logs endpoint.
//! - `users`, `residents`, `nursing_notes`, `evolutions`: the care records
//!   the scans in [`crate::reports`] aggregate over. This module only reads
//!   `users` (name lookup for nicer messages).
//!
//! All mutations are single-document and filtered by device, status and a
//! trailing time window, so two concurrent acks cannot close the same entry
//! twice.

use futures::TryStreamExt;
use mongodb::{
    Client, Database,
    bson::{DateTime, Document, doc, oid::ObjectId},
    options::ReturnDocument,
};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, mqtt::AckEvent};

pub const LOGS_COLLECTION: &str = "gate_logs";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Sent,
    BlockedTime,
    Done,
    Ignored,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateRequestLog {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: String,
    pub user_name: String,
    pub device_id: String,
    pub status: LogStatus,
    pub requested_ms: i64,
    pub requested_at: DateTime,
    pub used: bool,

    // night-window context, only on blocked_time entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,

    // device telemetry, only after the finalizer closed the entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i64>,
    #[serde(rename = "uptime_s", skip_serializing_if = "Option::is_none")]
    pub uptime_s: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl GateRequestLog {
    pub fn sent(user_id: &str, user_name: &str, device_id: &str, requested_ms: i64) -> Self {
        Self {
            id: ObjectId::new(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            device_id: device_id.to_string(),
            status: LogStatus::Sent,
            requested_ms,
            requested_at: DateTime::now(),
            used: false,
            window: None,
            tz: None,
            hour: None,
            info: None,
            rssi: None,
            uptime_s: None,
            ip: None,
            heap: None,
            ts: None,
            received_at: None,
            topic: None,
        }
    }

    pub fn blocked(
        user_id: &str,
        user_name: &str,
        device_id: &str,
        requested_ms: i64,
        window: &str,
        tz: &str,
        hour: u32,
    ) -> Self {
        Self {
            status: LogStatus::BlockedTime,
            used: true,
            window: Some(window.to_string()),
            tz: Some(tz.to_string()),
            hour: Some(hour),
            ..Self::sent(user_id, user_name, device_id, requested_ms)
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pub db: Database,
}

impl Store {
    pub async fn connect(url: &str, db_name: &str) -> Self {
        let client = Client::with_uri_str(url).await.expect("Mongo misconfigured!");

        Self {
            db: client.database(db_name),
        }
    }

    fn logs(&self) -> mongodb::Collection<GateRequestLog> {
        self.db.collection(LOGS_COLLECTION)
    }

    pub async fn insert_log(&self, entry: &GateRequestLog) -> Result<(), AppError> {
        self.logs().insert_one(entry).await?;

        Ok(())
    }

    /// Newest-first log entries for one device, capped at 500.
    pub async fn recent_logs(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<GateRequestLog>, AppError> {
        let cursor = self
            .logs()
            .find(doc! {"deviceId": device_id})
            .sort(doc! {"requestedAt": -1})
            .limit(limit.clamp(1, 500))
            .await?;

        Ok(cursor.try_collect().await?)
    }

    /// Closes the most recent pending entry that the given ack can belong to.
    ///
    /// Single atomic find-and-update: filter on device, `sent`, not yet used
    /// and requested inside the trailing match window, newest first. Duplicate
    /// ack deliveries find nothing left to close.
    pub async fn close_pending(
        &self,
        event: &AckEvent,
        window_s: i64,
    ) -> Result<Option<GateRequestLog>, AppError> {
        let Some(status) = event.payload.status.as_deref() else {
            return Ok(None);
        };

        let window_start =
            DateTime::from_millis(DateTime::now().timestamp_millis() - window_s * 1000);
        let ts = event
            .payload
            .ts
            .map(|s| DateTime::from_millis(s * 1000))
            .unwrap_or(event.received_at);

        let closed = self
            .logs()
            .find_one_and_update(
                doc! {
                    "deviceId": &event.device_id,
                    "status": "sent",
                    "used": {"$ne": true},
                    "requestedAt": {"$gte": window_start},
                },
                doc! {"$set": {
                    "used": true,
                    "status": status,
                    "info": event.payload.info.clone(),
                    "rssi": event.payload.rssi,
                    "uptime_s": event.payload.uptime_s,
                    "ip": event.payload.ip.clone(),
                    "heap": event.payload.heap,
                    "ts": ts,
                    "receivedAt": event.received_at,
                    "topic": &event.topic,
                }},
            )
            .sort(doc! {"requestedAt": -1})
            .return_document(ReturnDocument::After)
            .await?;

        Ok(closed)
    }

    /// Best-effort display name for a user id, None when unknown.
    pub async fn user_name(&self, user_id: &str) -> Option<String> {
        let oid = ObjectId::parse_str(user_id).ok()?;

        let user = self
            .db
            .collection::<Document>("users")
            .find_one(doc! {"_id": oid})
            .projection(doc! {"name": 1})
            .await
            .ok()
            .flatten()?;

        user.get_str("name").ok().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson;
    use serde_json::json;

    use super::{GateRequestLog, LogStatus};

    #[test]
    fn status_wire_values() {
        assert_eq!(serde_json::to_value(LogStatus::Sent).unwrap(), json!("sent"));
        assert_eq!(
            serde_json::to_value(LogStatus::BlockedTime).unwrap(),
            json!("blocked_time")
        );
        assert_eq!(serde_json::to_value(LogStatus::Done).unwrap(), json!("done"));
        assert_eq!(serde_json::to_value(LogStatus::Ignored).unwrap(), json!("ignored"));
    }

    #[test]
    fn sent_entries_start_open() {
        let entry = GateRequestLog::sent("64b0c5f7a3e1d20012345678", "Maria Santos", "gate01", 300);

        assert_eq!(entry.status, LogStatus::Sent);
        assert!(!entry.used);

        let doc = bson::to_document(&entry).unwrap();
        assert!(doc.contains_key("_id"));
        assert_eq!(doc.get_str("userId").unwrap(), "64b0c5f7a3e1d20012345678");
        assert_eq!(doc.get_i64("requestedMs").unwrap(), 300);
        assert!(!doc.contains_key("window"));
        assert!(!doc.contains_key("receivedAt"));
    }

    #[test]
    fn blocked_entries_carry_window_context() {
        let entry = GateRequestLog::blocked(
            "u1",
            "u1",
            "gate01",
            300,
            "22-6",
            "America/Sao_Paulo",
            23,
        );

        assert_eq!(entry.status, LogStatus::BlockedTime);
        assert!(entry.used);

        let doc = bson::to_document(&entry).unwrap();
        assert_eq!(doc.get_str("window").unwrap(), "22-6");
        assert_eq!(doc.get_str("status").unwrap(), "blocked_time");
    }
}
