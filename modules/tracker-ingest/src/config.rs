use std::env;
use std::str::FromStr;
use std::time::Duration;

use event_bus::retry::BackoffPolicy;
use event_bus::MqttConfig;

/// Which broker implementation backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Mqtt,
    InMemory,
}

/// Which store the mirror and DLQ tables live in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Postgres,
    InMemory,
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub store_type: StoreType,
    pub bus_type: BusType,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_client_id: String,
    pub mqtt_keep_alive_secs: u64,

    pub topic_root: String,
    pub dlq_root: String,

    // Reconnect backoff
    pub reconnect_max_retries: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,

    pub publish_max_retries: u32,
    pub schema_enforce: bool,

    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the process env in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_type = match lookup("STORE_TYPE")
            .unwrap_or_else(|| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreType::Postgres,
            "inmemory" => StoreType::InMemory,
            other => {
                return Err(format!(
                    "Invalid STORE_TYPE: {}. Must be 'postgres' or 'inmemory'",
                    other
                ))
            }
        };

        let bus_type = match lookup("BUS_TYPE")
            .unwrap_or_else(|| "mqtt".to_string())
            .to_lowercase()
            .as_str()
        {
            "mqtt" => BusType::Mqtt,
            "inmemory" => BusType::InMemory,
            other => {
                return Err(format!(
                    "Invalid BUS_TYPE: {}. Must be 'mqtt' or 'inmemory'",
                    other
                ))
            }
        };

        let database_url = lookup("DATABASE_URL");
        if store_type == StoreType::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set".to_string());
        }

        let topic_root = lookup("MQTT_TOPIC_ROOT").unwrap_or_else(|| "tracker".to_string());
        let dlq_root = lookup("MQTT_DLQ_ROOT").unwrap_or_else(|| format!("{}/dlq", topic_root));

        let reconnect_base_delay = parse_secs(&lookup, "MQTT_RECONNECT_BASE_DELAY_SECS", 1.0)?;
        let reconnect_max_delay = parse_secs(&lookup, "MQTT_RECONNECT_MAX_DELAY_SECS", 60.0)?;

        Ok(Config {
            database_url,
            store_type,
            bus_type,
            mqtt_host: lookup("MQTT_HOST").unwrap_or_else(|| "localhost".to_string()),
            mqtt_port: parse(&lookup, "MQTT_PORT", 1883)?,
            mqtt_username: lookup("MQTT_USERNAME").unwrap_or_default(),
            mqtt_password: lookup("MQTT_PASSWORD").unwrap_or_default(),
            mqtt_client_id: lookup("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("tracker-ingest-{}", uuid::Uuid::new_v4().simple())),
            mqtt_keep_alive_secs: parse(&lookup, "MQTT_KEEP_ALIVE_SECS", 30)?,
            topic_root,
            dlq_root,
            reconnect_max_retries: parse(&lookup, "MQTT_RECONNECT_MAX_RETRIES", 5)?,
            reconnect_base_delay,
            reconnect_max_delay,
            publish_max_retries: parse(&lookup, "MQTT_PUBLISH_MAX_RETRIES", 3)?,
            schema_enforce: parse(&lookup, "EVENT_SCHEMA_ENFORCE", false)?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&lookup, "PORT", 8093)?,
        })
    }

    pub fn mqtt(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            ..MqttConfig::default()
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            max_retries: self.reconnect_max_retries,
        }
    }

    /// Inbound topic filters: events, commands and metrics namespaces
    pub fn topic_filters(&self) -> Vec<String> {
        vec![
            format!("{}/events/+/+", self.topic_root),
            format!("{}/commands/+", self.topic_root),
            format!("{}/metrics/+", self.topic_root),
        ]
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

// Fractional seconds; rejects negatives, NaN and anything Duration cannot hold
fn parse_secs<F>(lookup: &F, key: &str, default: f64) -> Result<Duration, String>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: f64 = parse(lookup, key, default)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("{} must be a non-negative number of seconds: {}", key, secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/tracker")]).unwrap();

        assert_eq!(config.bus_type, BusType::Mqtt);
        assert_eq!(config.store_type, StoreType::Postgres);
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.reconnect_max_retries, 5);
        assert_eq!(config.publish_max_retries, 3);
        assert_eq!(config.dlq_root, "tracker/dlq");
        assert!(!config.schema_enforce);
        assert!(config.mqtt_client_id.starts_with("tracker-ingest-"));

        let backoff = config.backoff();
        assert_eq!(backoff.base_delay, Duration::from_secs(1));
        assert_eq!(backoff.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_postgres_store_requires_database_url() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.contains("DATABASE_URL"));

        assert!(config_from(&[("STORE_TYPE", "inmemory")]).is_ok());
    }

    #[test]
    fn test_topic_filters_follow_root() {
        let config = config_from(&[("STORE_TYPE", "inmemory"), ("MQTT_TOPIC_ROOT", "acme")]).unwrap();

        assert_eq!(
            config.topic_filters(),
            vec!["acme/events/+/+", "acme/commands/+", "acme/metrics/+"]
        );
        assert_eq!(config.dlq_root, "acme/dlq");
    }

    #[test]
    fn test_fractional_backoff_seconds() {
        let config = config_from(&[
            ("STORE_TYPE", "inmemory"),
            ("MQTT_RECONNECT_BASE_DELAY_SECS", "0.25"),
            ("MQTT_RECONNECT_MAX_DELAY_SECS", "2.5"),
        ])
        .unwrap();

        let backoff = config.backoff();
        assert_eq!(backoff.base_delay, Duration::from_millis(250));
        assert_eq!(backoff.max_delay, Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let err = config_from(&[("STORE_TYPE", "inmemory"), ("MQTT_PORT", "not-a-port")]).unwrap_err();
        assert!(err.contains("MQTT_PORT"));

        let err = config_from(&[("STORE_TYPE", "inmemory"), ("BUS_TYPE", "nats")]).unwrap_err();
        assert!(err.contains("BUS_TYPE"));

        let err = config_from(&[
            ("STORE_TYPE", "inmemory"),
            ("MQTT_RECONNECT_BASE_DELAY_SECS", "-1"),
        ])
        .unwrap_err();
        assert!(err.contains("MQTT_RECONNECT_BASE_DELAY_SECS"));
    }

    #[test]
    fn test_out_of_range_delays_are_rejected() {
        for raw in ["1e30", "inf", "NaN"] {
            let err = config_from(&[
                ("STORE_TYPE", "inmemory"),
                ("MQTT_RECONNECT_MAX_DELAY_SECS", raw),
            ])
            .unwrap_err();
            assert!(err.contains("MQTT_RECONNECT_MAX_DELAY_SECS"), "{raw}: {err}");
        }

        // Large but representable is fine
        let config = config_from(&[
            ("STORE_TYPE", "inmemory"),
            ("MQTT_RECONNECT_MAX_DELAY_SECS", "86400"),
        ])
        .unwrap();
        assert_eq!(config.backoff().max_delay, Duration::from_secs(86_400));
    }

    #[test]
    fn test_credentials_flow_into_mqtt_config() {
        let config = config_from(&[
            ("STORE_TYPE", "inmemory"),
            ("MQTT_USERNAME", "svc"),
            ("MQTT_PASSWORD", "secret"),
            ("MQTT_CLIENT_ID", "ingest-1"),
        ])
        .unwrap();

        let mqtt = config.mqtt();
        assert_eq!(mqtt.username, "svc");
        assert_eq!(mqtt.password, "secret");
        assert_eq!(mqtt.client_id, "ingest-1");
    }
}
