use anyhow::{Context, Result};
use rumqttc::{Client, Connection, MqttOptions, QoS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: i32,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(default = "MqttConfig::default_keep_alive_secs")]
    keep_alive_secs: u64,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "fujiac".into()
    }

    fn default_qos() -> i32 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("fujiac-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive_secs() -> u64 {
        30
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    pub fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Topic filter the daemon subscribes to for inbound set requests,
    /// e.g. `fujiac/set/temperature`.
    pub fn set_topic_filter(&self) -> String {
        format!("{}/set/#", self.topic)
    }

    pub fn create_client(&self) -> Result<(Client, Connection)> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }

        log::info!(
            "Connecting to MQTT broker {}:{} with client_id: {}",
            self.host,
            self.port,
            self.client_id
        );

        Ok(Client::new(options, 10))
    }
}

pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
}

impl MqttPublisher {
    pub fn new(client: Client, config: MqttConfig) -> Self {
        Self { client, config }
    }

    pub fn topic(&self) -> &str {
        self.config.topic()
    }

    pub fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        log::debug!(
            "Publishing to MQTT: Topic='{}', Payload='{payload}', QoS={:?}",
            topic,
            self.config.qos()
        );

        self.client
            .publish(topic, self.config.qos(), false, payload)
            .with_context(|| format!("Failed to publish message to MQTT topic: {topic}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_defaults_from_minimal_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "host: broker.local").expect("write yaml");

        let config = MqttConfig::load(file.path().to_str().expect("utf-8 path")).expect("load");
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic, "fujiac");
        assert_eq!(config.qos(), QoS::AtMostOnce);
        assert!(config.client_id.starts_with("fujiac-"));
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.set_topic_filter(), "fujiac/set/#");
    }

    #[test]
    fn config_rejects_missing_host() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "port: 1883").expect("write yaml");

        assert!(MqttConfig::load(file.path().to_str().expect("utf-8 path")).is_err());
    }
}
