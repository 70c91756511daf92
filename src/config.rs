use std::net::SocketAddr;
use std::time::Duration;

/// Shared message bus settings.
///
/// The relay accepts any client when `app_key` is unset. When set, workers
/// must present the same key on connect. The hosted-provider credential set
/// collapses to this single shared key under the built-in websocket relay.
#[derive(Debug, Clone, Default)]
pub struct BusConfig {
    /// Shared application key presented by bus clients.
    pub app_key: Option<String>,
}

/// Configuration for the coordinator process.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address the HTTP surface (and bus relay) listens on.
    pub listen_addr: SocketAddr,
    /// Upper bound on how long an /execute caller waits for a worker response.
    pub request_timeout: Duration,
    /// How often the liveness monitor sweeps the registry.
    pub sweep_interval: Duration,
    /// Heartbeat age beyond which a worker is evicted.
    pub heartbeat_timeout: Duration,
    pub bus: BusConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000"
                .parse()
                .expect("default listen address is valid"),
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(30),
            bus: BusConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_liveness(mut self, sweep_interval: Duration, heartbeat_timeout: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self.heartbeat_timeout = heartbeat_timeout;
        self
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the coordinator HTTP surface.
    pub coordinator_url: String,
    /// Websocket URL of the bus relay.
    pub bus_url: String,
    /// How often the worker emits a heartbeat, regardless of job activity.
    pub heartbeat_interval: Duration,
    /// Fixed network address to report. When unset the worker asks
    /// `address_echo_url` for its public address.
    pub address_override: Option<String>,
    /// HTTP endpoint that echoes the caller's public address.
    pub address_echo_url: String,
    /// Default host probed by the ping handler.
    pub ping_host: String,
    /// Upstream base URL for the proxy handler.
    pub proxy_base_url: Option<String>,
    /// API key forwarded by the proxy handler.
    pub proxy_api_key: Option<String>,
    pub bus: BusConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:3000".to_string(),
            bus_url: "ws://127.0.0.1:3000/bus".to_string(),
            heartbeat_interval: Duration::from_secs(15),
            address_override: None,
            address_echo_url: "https://ipconfig.io".to_string(),
            ping_host: "google.com".to_string(),
            proxy_base_url: None,
            proxy_api_key: None,
            bus: BusConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Build a worker config pointed at a coordinator base URL. The bus URL is
    /// derived from it unless overridden afterwards.
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        let coordinator_url = coordinator_url.into();
        let bus_url = derive_bus_url(&coordinator_url);
        Self {
            coordinator_url,
            bus_url,
            ..Default::default()
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address_override = Some(address.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Map an http(s) coordinator URL to the ws(s) URL of its bus relay.
fn derive_bus_url(coordinator_url: &str) -> String {
    let base = coordinator_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    };
    format!("{ws}/bus")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(20));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(30));
        assert!(cfg.bus.app_key.is_none());
    }

    #[test]
    fn coordinator_config_builders() {
        let cfg = CoordinatorConfig::default()
            .with_request_timeout(Duration::from_millis(100))
            .with_liveness(Duration::from_secs(5), Duration::from_secs(10));
        assert_eq!(cfg.request_timeout, Duration::from_millis(100));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(10));
    }

    #[test]
    fn worker_config_derives_bus_url() {
        let cfg = WorkerConfig::new("http://10.0.0.5:3000");
        assert_eq!(cfg.bus_url, "ws://10.0.0.5:3000/bus");

        let cfg = WorkerConfig::new("https://coordinator.example.com/");
        assert_eq!(cfg.bus_url, "wss://coordinator.example.com/bus");
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(15));
        assert!(cfg.address_override.is_none());
        assert_eq!(cfg.ping_host, "google.com");
    }

    #[test]
    fn worker_config_with_address() {
        let cfg = WorkerConfig::new("http://127.0.0.1:3000").with_address("10.0.0.1");
        assert_eq!(cfg.address_override.as_deref(), Some("10.0.0.1"));
    }
}
