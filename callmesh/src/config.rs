use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use webrtc::{ice_transport::ice_server::RTCIceServer, peer_connection::configuration::RTCConfiguration};

use crate::error::ConfigError;

const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Connectivity helper server, in the browser's `RTCIceServer` shape
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// HTTP port for the landing page, room pages and runtime config
    pub port: u16,
    /// WebSocket port for the signaling relay
    pub signal_port: u16,
    #[serde(rename = "public")]
    pub public_dir: PathBuf,
    #[serde(rename = "corsorigins")]
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    #[serde(rename = "iceservers")]
    pub ice_servers: Vec<IceServerConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webrtc: WebRTCConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            signal_port: 4000,
            public_dir: PathBuf::from("./public"),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }
}

pub fn load(content: &str) -> Result<Config, ConfigError> {
    let mut decoded_config: Config = toml::from_str(content)?;
    if decoded_config.webrtc.ice_servers.is_empty() {
        decoded_config.webrtc.ice_servers = default_ice_servers();
    }
    Ok(decoded_config)
}

pub fn default_ice_servers() -> Vec<IceServerConfig> {
    DEFAULT_STUN_SERVERS
        .iter()
        .map(|url| IceServerConfig {
            urls: vec![(*url).to_owned()],
            username: String::new(),
            credential: String::new(),
        })
        .collect()
}

/// Parse an ICE server list given as a JSON array, falling back to the
/// public STUN servers when it is absent, malformed or empty
pub fn parse_ice_servers(value: Option<&str>) -> Vec<IceServerConfig> {
    let Some(value) = value else {
        return default_ice_servers();
    };

    match serde_json::from_str::<Vec<IceServerConfig>>(value) {
        Ok(servers) if !servers.is_empty() => servers,
        Ok(_) => {
            warn!("ICE_SERVERS must be a non-empty JSON array. Falling back to defaults.");
            default_ice_servers()
        }
        Err(e) => {
            warn!("Unable to parse ICE_SERVERS ({e}). Falling back to defaults.");
            default_ice_servers()
        }
    }
}

/// Split a comma separated origin list, dropping blanks
pub fn parse_origins(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_owned)
        .collect()
}

impl Config {
    /// Apply environment overrides on top of the file config
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(servers) = lookup("ICE_SERVERS") {
            self.webrtc.ice_servers = parse_ice_servers(Some(&servers));
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = parse_origins(Some(&origins));
        }
        if let Some(host) = lookup("HOST").filter(|host| !host.is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PORT `{port}`"),
            }
        }
        if let Some(port) = lookup("SIGNAL_PORT") {
            match port.parse() {
                Ok(port) => self.server.signal_port = port,
                Err(_) => warn!("Ignoring invalid SIGNAL_PORT `{port}`"),
            }
        }
        self
    }
}

impl WebRTCConfig {
    /// Peer connection configuration for the negotiated connections
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

/// Accept `"stun:..."` as well as `["stun:...", ...]`
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config = load("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.signal_port, 4000);
        assert_eq!(config.webrtc.ice_servers, default_ice_servers());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = load(
            r#"
            [server]
            port = 8080
            corsorigins = ["https://meet.example"]

            [[webrtc.iceservers]]
            urls = "turn:turn.example:3478"
            username = "user"
            credential = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.cors_origins, vec!["https://meet.example"]);
        assert_eq!(config.webrtc.ice_servers[0].urls, vec!["turn:turn.example:3478"]);
        assert_eq!(config.webrtc.ice_servers[0].credential, "secret");
    }

    #[test]
    fn broken_file_is_an_error() {
        assert!(load("[server\nport = ").is_err());
    }

    #[test]
    fn ice_servers_fall_back_on_bad_input() {
        assert_eq!(parse_ice_servers(None), default_ice_servers());
        assert_eq!(parse_ice_servers(Some("not json")), default_ice_servers());
        assert_eq!(parse_ice_servers(Some("[]")), default_ice_servers());
        assert_eq!(parse_ice_servers(Some(r#"{"urls":"stun:x"}"#)), default_ice_servers());

        let servers = parse_ice_servers(Some(r#"[{"urls":["stun:a","stun:b"]}]"#));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:a", "stun:b"]);
    }

    #[test]
    fn origins_are_trimmed() {
        assert!(parse_origins(None).is_empty());
        assert_eq!(
            parse_origins(Some(" https://a.example, ,https://b.example ")),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("SIGNAL_PORT", "nope"),
            ("CORS_ORIGINS", "https://a.example"),
            ("ICE_SERVERS", r#"[{"urls":"stun:only"}]"#),
        ]
        .into_iter()
        .collect();

        let config = Config::default().with_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.signal_port, 4000);
        assert_eq!(config.server.cors_origins, vec!["https://a.example"]);
        assert_eq!(config.webrtc.ice_servers[0].urls, vec!["stun:only"]);
    }

    #[test]
    fn rtc_configuration_carries_servers() {
        let rtc = WebRTCConfig::default().rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[0].urls, vec![DEFAULT_STUN_SERVERS[0]]);
    }
}
