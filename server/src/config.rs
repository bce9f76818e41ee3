use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use chrono_tz::Tz;
use tracing::{info, warn};

pub struct Config {
    pub port: u16,

    pub mongo_url: String,
    pub mongo_db: String,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_tls: bool,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub topic_base: String,
    pub device_id: String,

    pub tz: Tz,
    pub block_start: u32,
    pub block_end: u32,
    pub ack_timeout_ms: u64,
    pub match_window_s: i64,

    pub wa_server: String,
    pub wa_key: String,
    pub notify_group: String,
    pub alerts_group: String,
    pub survey_group: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "8080"),

            mongo_url: try_load("MONGO_URL", "mongodb://localhost:27017"),
            mongo_db: try_load("MONGO_DB", "lar"),

            mqtt_host: try_load("MQTT_HOST", "localhost"),
            mqtt_port: try_load("MQTT_PORT", "8883"),
            mqtt_tls: try_load("MQTT_TLS", "true"),
            mqtt_user: try_load("MQTT_USER", ""),
            mqtt_pass: read_secret("MQTT_PASS"),
            topic_base: try_load("MQTT_TOPIC_BASE", "lar"),
            device_id: try_load("MQTT_DEVICE_ID", "gate01"),

            tz: try_load("GATE_TZ", "America/Sao_Paulo"),
            block_start: try_load("GATE_BLOCK_START", "22"),
            block_end: try_load("GATE_BLOCK_END", "6"),
            ack_timeout_ms: try_load("GATE_ACK_TIMEOUT_MS", "5000"),
            match_window_s: try_load("GATE_MATCH_WINDOW_S", "30"),

            wa_server: try_load("WAPI_SERVER", ""),
            wa_key: read_secret("WAPI_KEY"),
            notify_group: try_load("WAPI_NOTIFY_GROUP", ""),
            alerts_group: try_load("WAPI_ALERTS_GROUP", ""),
            survey_group: try_load("WAPI_SURVEY_GROUP", ""),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| var(secret_name).unwrap_or_default())
}
