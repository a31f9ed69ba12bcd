use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    core: Core,
    discovery: Discovery,
    session: Session,
}

impl AppConfig {
    pub fn load() -> Self {
        Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(config::File::with_name("config_local").required(false))
            .add_source(config::Environment::default())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[derive(Debug, Deserialize)]
pub struct Core {
    event_buffer_size: usize,
}

impl Core {
    pub fn event_buffer_size(&self) -> usize {
        self.event_buffer_size
    }
}

#[derive(Debug, Deserialize)]
pub struct Discovery {
    #[serde(with = "humantime_serde")]
    interval: Duration,
    multicast_address: String,
    /// `host:port` entries added without waiting for a discovery reply.
    #[serde(default)]
    manual_lights: Vec<String>,
}

impl Discovery {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn multicast_address(&self) -> &str {
        &self.multicast_address
    }

    pub fn manual_lights(&self) -> &[String] {
        &self.manual_lights
    }
}

#[derive(Debug, Deserialize)]
pub struct Session {
    #[serde(with = "humantime_serde")]
    request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    stale_connection_timeout: Duration,
}

impl Session {
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn stale_connection_timeout(&self) -> Duration {
        self.stale_connection_timeout
    }
}

#[cfg(test)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn new() -> Self {
        AppConfigBuilder {
            config: AppConfig {
                core: Core { event_buffer_size: 32 },
                discovery: Discovery {
                    interval: Duration::from_secs(60),
                    multicast_address: "239.255.255.250:1982".to_string(),
                    manual_lights: Vec::new(),
                },
                session: Session {
                    request_timeout: Duration::from_secs(5),
                    heartbeat_interval: Duration::from_secs(10),
                    stale_connection_timeout: Duration::from_secs(32),
                },
            },
        }
    }

    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery.interval = interval;
        self
    }

    pub fn manual_light(mut self, entry: &str) -> Self {
        self.config.discovery.manual_lights.push(entry.to_string());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.session.request_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.session.heartbeat_interval = interval;
        self
    }

    pub fn stale_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.session.stale_connection_timeout = timeout;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}
