//! Gate-open flow: night-window check, pending log entry, press command,
//! bounded wait for the device ack. Side effects on WhatsApp are best-effort
//! and never change what the caller gets back.

use std::time::Duration;

use chrono::{Timelike, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    error::AppError,
    mqtt::wait_for_ack,
    state::AppState,
    store::GateRequestLog,
    utils::format_name,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckSummary {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOutcome {
    pub ok: bool,
    pub ack: AckSummary,
    pub correlation_id: String,
}

/// Pulse duration actually sent to the device. Anything unusable falls back
/// to 300 ms, everything else is clamped to what the relay tolerates.
pub fn clamp_pulse(raw: Option<&Value>) -> i64 {
    let ms = raw.and_then(Value::as_f64).unwrap_or(300.0);

    (ms as i64).clamp(100, 5000)
}

/// Night-window predicate. A start hour above the end hour means the window
/// spans midnight, e.g. 22 to 6 blocks 22:00 through 05:59.
pub fn is_blocked(hour: u32, start: u32, end: u32) -> bool {
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// One end-to-end gate-open request.
///
/// The ack bus subscription is taken out before the command is published, so
/// an ack can never slip between publish and wait. The pending log entry is
/// closed by the finalizer in [`crate::mqtt`], not here; a timeout below
/// leaves it open on purpose, because the device may still have acted.
pub async fn open(
    state: &AppState,
    user_id: &str,
    pulse_ms: Option<&Value>,
) -> Result<OpenOutcome, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::MissingUserId);
    }

    let config = &state.config;
    let ms = clamp_pulse(pulse_ms);
    let hour = Utc::now().with_timezone(&config.tz).hour();
    let window = format!("{}-{}", config.block_start, config.block_end);

    let user_name = state
        .store
        .user_name(user_id)
        .await
        .unwrap_or_else(|| user_id.to_string());
    let short_name = format_name(&user_name);

    if is_blocked(hour, config.block_start, config.block_end) {
        info!("Gate request by {user_name} blocked, hour {hour} in window {window}");

        let entry = GateRequestLog::blocked(
            user_id,
            &user_name,
            &config.device_id,
            ms,
            &window,
            config.tz.name(),
            hour,
        );
        state.store.insert_log(&entry).await?;

        state.whatsapp.notify(
            &config.notify_group,
            format!("🚫 {short_name} tried the gate during the night window ({hour}h)"),
        );

        return Err(AppError::BlockedByPolicy {
            window,
            tz: config.tz.name().to_string(),
            hour,
        });
    }

    let acks = state.gate.subscribe_acks();

    let entry = GateRequestLog::sent(user_id, &user_name, &config.device_id, ms);
    let correlation_id = entry.id.to_hex();
    let requested_millis = entry.requested_at.timestamp_millis();

    state.store.insert_log(&entry).await?;

    state.whatsapp.notify(
        &config.notify_group,
        format!("🔑 {short_name} asked the gate to open ({ms} ms)"),
    );

    state.gate.press(ms).await?;

    let ack = wait_for_ack(
        acks,
        &config.device_id,
        requested_millis,
        Duration::from_millis(config.ack_timeout_ms),
    )
    .await;

    match ack {
        Some(ack) => {
            let status = ack.payload.status.clone().unwrap_or_default();
            info!("Gate confirmed {status} for request {correlation_id}");

            state
                .whatsapp
                .notify(&config.notify_group, format!("✅ Gate opened for {short_name}"));

            Ok(OpenOutcome {
                ok: true,
                ack: AckSummary {
                    status,
                    ts: ack.payload.ts,
                    info: ack.payload.info.clone(),
                },
                correlation_id,
            })
        }
        None => {
            info!("No ack for request {correlation_id} within {}ms", config.ack_timeout_ms);

            state.whatsapp.notify(
                &config.notify_group,
                format!("⚠️ No confirmation from the gate for {short_name}"),
            );

            Err(AppError::NoAck { correlation_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{clamp_pulse, is_blocked};

    #[test]
    fn clamp_defaults_and_bounds() {
        assert_eq!(clamp_pulse(None), 300);
        assert_eq!(clamp_pulse(Some(&json!(null))), 300);
        assert_eq!(clamp_pulse(Some(&json!("fast"))), 300);
        assert_eq!(clamp_pulse(Some(&json!(-5))), 100);
        assert_eq!(clamp_pulse(Some(&json!(0))), 100);
        assert_eq!(clamp_pulse(Some(&json!(99))), 100);
        assert_eq!(clamp_pulse(Some(&json!(250))), 250);
        assert_eq!(clamp_pulse(Some(&json!(9999))), 5000);
        assert_eq!(clamp_pulse(Some(&json!(99999))), 5000);
    }

    #[test]
    fn night_window_spans_midnight() {
        for hour in [22, 23, 0, 5] {
            assert!(is_blocked(hour, 22, 6), "hour {hour} should be blocked");
        }

        for hour in [6, 12, 21] {
            assert!(!is_blocked(hour, 22, 6), "hour {hour} should be open");
        }
    }

    #[test]
    fn same_day_window() {
        for hour in 8..18 {
            assert!(is_blocked(hour, 8, 18), "hour {hour} should be blocked");
        }

        assert!(!is_blocked(18, 8, 18));
        assert!(!is_blocked(7, 8, 18));
    }
}
