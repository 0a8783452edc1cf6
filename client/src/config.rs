use std::time::Duration;

pub const DEFAULT_DOMAIN_UDP_PORT: u16 = 40102;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub domain_host: String,
    pub domain_udp_port: u16,

    /// Seed fixed demo entities instead of waiting for real traffic.
    pub simulation_mode: bool,

    pub discovery_enabled: bool,
    pub discovery_endpoint: Option<String>,

    /// Log per-packet detail (type, length, peer) on every send and receive.
    pub verbose_protocol_logging: bool,

    pub ping_interval: Duration,
    pub handshake_retry_interval: Duration,
    /// How long the server may stay silent before the session is treated as
    /// dropped and the handshake restarts.
    pub silent_server_timeout: Duration,
}

impl ClientConfig {
    pub fn new(domain_host: impl Into<String>) -> ClientConfig {
        ClientConfig {
            domain_host: domain_host.into(),
            domain_udp_port: DEFAULT_DOMAIN_UDP_PORT,
            simulation_mode: false,
            discovery_enabled: false,
            discovery_endpoint: None,
            verbose_protocol_logging: false,
            ping_interval: Duration::from_secs(1),
            handshake_retry_interval: Duration::from_secs(3),
            silent_server_timeout: Duration::from_secs(15),
        }
    }

    /// Like [`ClientConfig::new`], with the recognized environment options
    /// applied on top.
    pub fn from_env(domain_host: impl Into<String>) -> ClientConfig {
        let mut config = ClientConfig::new(domain_host);
        if let Some(port) = env_var("OVERTE_UDP_PORT").and_then(|v| v.parse().ok()) {
            config.domain_udp_port = port;
        }
        config.simulation_mode = env_flag("OVERTE_SIMULATE");
        config.discovery_endpoint = env_var("OVERTE_DISCOVERY_URL");
        config.discovery_enabled = env_flag("OVERTE_DISCOVERY") || config.discovery_endpoint.is_some();
        config.verbose_protocol_logging = env_flag("OVERTE_VERBOSE_PROTOCOL");
        config
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    matches!(env_var(name).as_deref(), Some("1") | Some("true") | Some("yes"))
}
