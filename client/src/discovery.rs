//! Metaverse directory parsing: turning the JSON a directory endpoint
//! returns into candidate domains. Fetching the JSON is an external
//! collaborator's job (any HTTP client will do); this module owns the pure
//! parts - permissive parsing across the key variants real directories use,
//! port defaulting, and de-duplication.

use serde_json::Value;

use crate::config::ClientConfig;

pub const DEFAULT_HTTP_PORT: u16 = 40102;
pub const DEFAULT_UDP_PORT: u16 = 40104;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DiscoveredDomain {
    pub name: String,
    pub network_host: String,
    pub http_port: u16,
    pub udp_port: u16,
}

/// Extracts domains from directory JSON. Directories disagree on key names,
/// so any object carrying one of the known host keys counts; ports fall
/// back to the well-known defaults. Unparseable input yields an empty list.
pub fn parse_domains(json: &str) -> Vec<DiscoveredDomain> {
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    collect(&value, &mut found);

    let mut deduped: Vec<DiscoveredDomain> = Vec::new();
    for domain in found {
        let exists = deduped.iter().any(|d| {
            d.network_host == domain.network_host
                && d.http_port == domain.http_port
                && d.udp_port == domain.udp_port
        });
        if !exists {
            deduped.push(domain);
        }
    }
    deduped
}

fn collect(value: &Value, out: &mut Vec<DiscoveredDomain>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(domain) = domain_from_object(map) {
                out.push(domain);
            }
            for nested in map.values() {
                collect(nested, out);
            }
        }
        _ => {}
    }
}

fn domain_from_object(map: &serde_json::Map<String, Value>) -> Option<DiscoveredDomain> {
    const HOST_KEYS: [&str; 4] = ["network_address", "ice_server_address", "domain", "address"];

    let host = HOST_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .filter(|host| !host.is_empty())?;

    Some(DiscoveredDomain {
        name: map
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        network_host: host.to_owned(),
        http_port: port_from(map, &["http_port", "domain_http_port"], DEFAULT_HTTP_PORT),
        udp_port: port_from(map, &["udp_port", "domain_udp_port"], DEFAULT_UDP_PORT),
    })
}

fn port_from(map: &serde_json::Map<String, Value>, keys: &[&str], default: u16) -> u16 {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_u64))
        .and_then(|port| u16::try_from(port).ok())
        .filter(|&port| port > 0)
        .unwrap_or(default)
}

/// Candidate directory URLs to try in order. A configured override replaces
/// the built-in list entirely.
pub fn discovery_endpoints(config: &ClientConfig) -> Vec<String> {
    if let Some(custom) = &config.discovery_endpoint {
        return vec![custom.clone()];
    }

    const BASES: [&str; 2] = [
        "https://metaverse.overte.org",
        "https://metaverse.vircadia.com",
    ];
    const PATHS: [&str; 2] = ["/api/v1/domains?status=online", "/api/v1/domains"];

    BASES
        .iter()
        .flat_map(|base| PATHS.iter().map(move |path| format!("{}{}", base, path)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directory_style_keys() {
        let json = r#"{
            "data": [
              {"name":"Alpha","network_address":"alpha.example.org","http_port":40102,"udp_port":40104},
              {"name":"Beta","ice_server_address":"beta.example.org","http_port":40103,"udp_port":40105}
            ]
        }"#;

        let domains = parse_domains(json);
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].network_host, "alpha.example.org");
        assert_eq!(domains[0].http_port, 40102);
        assert_eq!(domains[0].udp_port, 40104);
        assert_eq!(domains[1].network_host, "beta.example.org");
        assert_eq!(domains[1].udp_port, 40105);
    }

    #[test]
    fn test_parse_alternative_keys_and_defaults() {
        let json = r#"{
            "domains": [
              {"name":"Gamma","address":"gamma.example.org","domain_http_port":40400,"domain_udp_port":40404},
              {"name":"Delta","address":"delta.example.org"}
            ]
        }"#;

        let domains = parse_domains(json);
        let gamma = domains
            .iter()
            .find(|d| d.network_host == "gamma.example.org")
            .unwrap();
        assert_eq!(gamma.http_port, 40400);
        assert_eq!(gamma.udp_port, 40404);

        let delta = domains
            .iter()
            .find(|d| d.network_host == "delta.example.org")
            .unwrap();
        assert_eq!(delta.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(delta.udp_port, DEFAULT_UDP_PORT);
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let json = r#"[
            {"network_address":"a.example.org","http_port":1,"udp_port":2},
            {"network_address":"a.example.org","http_port":1,"udp_port":2},
            {"network_address":"a.example.org","http_port":1,"udp_port":3}
        ]"#;
        assert_eq!(parse_domains(json).len(), 2);
    }

    #[test]
    fn test_garbage_input_yields_empty() {
        assert!(parse_domains("not json at all").is_empty());
        assert!(parse_domains("{}").is_empty());
    }

    #[test]
    fn test_endpoint_override_replaces_builtin_list() {
        let mut config = ClientConfig::new("example.org");
        assert!(discovery_endpoints(&config).len() > 1);

        config.discovery_endpoint = Some("https://directory.example.org/api".to_owned());
        assert_eq!(
            discovery_endpoints(&config),
            vec!["https://directory.example.org/api".to_owned()]
        );
    }
}
