use std::{fmt, time::Duration};

use {
    chatrelay_channels::{AllowList, BridgeTimeouts, Error},
    chatrelay_config::{Diagnostic, Severity},
    serde::{Deserialize, Serialize},
};

use crate::CHANNEL_NAME;

/// Port used when `signal_service` names only a host.
pub const DEFAULT_SERVICE_PORT: u16 = 8080;

pub const DEFAULT_REJECTION_MESSAGE: &str =
    "Sorry, you are not authorized to talk to this bot.";

/// Configuration for the Signal account the bot runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalAccountConfig {
    pub enabled: bool,

    /// Registered account number in E.164 form (e.g. `+14155550100`).
    pub phone_number: String,

    /// Address of the signal-cli REST service: `host:port`, `host`, or a
    /// full `http(s)://host:port` URL.
    pub signal_service: String,

    /// Senders allowed to reach the bus. Empty allows everyone.
    pub allow_from: Vec<String>,

    /// Answer denied senders with `rejection_message`.
    pub reject_unauthorized: bool,

    pub rejection_message: String,

    /// Quote the sender's latest message when replying.
    pub quote_replies: bool,

    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub send_timeout_secs: u64,
}

impl Default for SignalAccountConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            phone_number: String::new(),
            signal_service: String::new(),
            allow_from: Vec::new(),
            reject_unauthorized: true,
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_string(),
            quote_replies: false,
            start_timeout_secs: 15,
            stop_timeout_secs: 5,
            send_timeout_secs: 30,
        }
    }
}

impl SignalAccountConfig {
    pub fn from_value(value: serde_json::Value) -> chatrelay_channels::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn allow_list(&self) -> AllowList {
        AllowList::new(self.allow_from.iter().map(String::as_str))
    }

    pub fn timeouts(&self) -> BridgeTimeouts {
        BridgeTimeouts {
            ready: Duration::from_secs(self.start_timeout_secs),
            send: Duration::from_secs(self.send_timeout_secs),
            stop: Duration::from_secs(self.stop_timeout_secs),
        }
    }

    /// Settings `start` cannot proceed without.
    pub fn require_endpoint(&self) -> chatrelay_channels::Result<ServiceEndpoint> {
        if self.phone_number.trim().is_empty() {
            return Err(Error::configuration(
                CHANNEL_NAME,
                "phone_number is not configured",
            ));
        }
        if self.signal_service.trim().is_empty() {
            return Err(Error::configuration(
                CHANNEL_NAME,
                "signal_service (signal-cli REST address) is not configured",
            ));
        }
        ServiceEndpoint::parse(&self.signal_service)
            .map_err(|e| Error::configuration(CHANNEL_NAME, e))
    }

    /// Semantic checks reported by `chatrelay check`.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let path = |field: &str| format!("channels.signal.{field}");
        if !self.enabled {
            return out;
        }

        if self.phone_number.trim().is_empty() {
            out.push(Diagnostic {
                severity: Severity::Error,
                category: "missing-field",
                path: path("phone_number"),
                message: "Signal is enabled but no phone_number is set".into(),
            });
        } else if !self.phone_number.starts_with('+') {
            out.push(Diagnostic {
                severity: Severity::Warning,
                category: "format",
                path: path("phone_number"),
                message: "phone_number should be in E.164 form (leading '+')".into(),
            });
        }

        if self.signal_service.trim().is_empty() {
            out.push(Diagnostic {
                severity: Severity::Error,
                category: "missing-field",
                path: path("signal_service"),
                message: "Signal is enabled but no signal_service address is set".into(),
            });
        } else if let Err(e) = ServiceEndpoint::parse(&self.signal_service) {
            out.push(Diagnostic {
                severity: Severity::Error,
                category: "format",
                path: path("signal_service"),
                message: e.to_string(),
            });
        }

        if self.allow_list().is_open() {
            out.push(Diagnostic {
                severity: Severity::Warning,
                category: "security",
                path: path("allow_from"),
                message: "allow_from is empty; anyone can message the bot".into(),
            });
        }

        for (field, secs) in [
            ("start_timeout_secs", self.start_timeout_secs),
            ("stop_timeout_secs", self.stop_timeout_secs),
            ("send_timeout_secs", self.send_timeout_secs),
        ] {
            if secs == 0 {
                out.push(Diagnostic {
                    severity: Severity::Error,
                    category: "range",
                    path: path(field),
                    message: format!("{field} must be greater than zero"),
                });
            }
        }
        out
    }
}

// ── Service address ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Parsed `signal_service` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("signal_service is empty")]
    Empty,
    #[error("signal_service has no host: {0:?}")]
    MissingHost(String),
    #[error("signal_service has an invalid port: {0:?}")]
    InvalidPort(String),
    #[error("signal_service uses an unsupported scheme: {0:?}")]
    UnsupportedScheme(String),
}

impl ServiceEndpoint {
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some(("http", rest)) => (Scheme::Http, rest),
            Some(("https", rest)) => (Scheme::Https, rest),
            Some((other, _)) => return Err(EndpointError::UnsupportedScheme(other.to_string())),
            None => (Scheme::Http, trimmed),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| EndpointError::InvalidPort(port.to_string()))?;
                (host, port)
            },
            None => (rest, DEFAULT_SERVICE_PORT),
        };
        if host.is_empty() || host.contains('/') {
            return Err(EndpointError::MissingHost(raw.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Base URL for REST calls, without a trailing slash.
    pub fn http_base(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Base URL for the websocket receive stream.
    pub fn ws_base(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.http_base())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn default_config() {
        let cfg = SignalAccountConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.phone_number, "");
        assert_eq!(cfg.signal_service, "");
        assert!(cfg.allow_from.is_empty());
        assert!(cfg.reject_unauthorized);
        assert!(!cfg.quote_replies);
        assert_eq!(cfg.timeouts(), BridgeTimeouts {
            ready: Duration::from_secs(15),
            send: Duration::from_secs(30),
            stop: Duration::from_secs(5),
        });
    }

    #[test]
    fn deserialize_from_json() {
        let json = serde_json::json!({
            "enabled": true,
            "phone_number": "+14206942069",
            "signal_service": "127.0.0.1:8080",
            "allow_from": ["+13072310423"],
        });
        let cfg = SignalAccountConfig::from_value(json).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.phone_number, "+14206942069");
        assert_eq!(cfg.allow_from, ["+13072310423"]);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.rejection_message, DEFAULT_REJECTION_MESSAGE);
        assert!(cfg.allow_list().permits("+13072310423"));
        assert!(!cfg.allow_list().permits("+10000000000"));
    }

    #[rstest]
    #[case("127.0.0.1:8080", "http://127.0.0.1:8080", "ws://127.0.0.1:8080")]
    #[case("signal-api", "http://signal-api:8080", "ws://signal-api:8080")]
    #[case("http://localhost:9922/", "http://localhost:9922", "ws://localhost:9922")]
    #[case("https://signal.example.com", "https://signal.example.com:8080", "wss://signal.example.com:8080")]
    fn parses_service_addresses(#[case] raw: &str, #[case] http: &str, #[case] ws: &str) {
        let endpoint = ServiceEndpoint::parse(raw).unwrap();
        assert_eq!(endpoint.http_base(), http);
        assert_eq!(endpoint.ws_base(), ws);
    }

    #[rstest]
    #[case("", EndpointError::Empty)]
    #[case("host:abc", EndpointError::InvalidPort("abc".into()))]
    #[case("host:0", EndpointError::InvalidPort("0".into()))]
    #[case(":8080", EndpointError::MissingHost(":8080".into()))]
    #[case("ftp://host", EndpointError::UnsupportedScheme("ftp".into()))]
    fn rejects_bad_addresses(#[case] raw: &str, #[case] expected: EndpointError) {
        assert_eq!(ServiceEndpoint::parse(raw).unwrap_err(), expected);
    }

    #[test]
    fn require_endpoint_names_missing_settings() {
        let mut cfg = SignalAccountConfig {
            signal_service: "127.0.0.1:8080".into(),
            ..Default::default()
        };
        let err = cfg.require_endpoint().unwrap_err();
        assert!(err.to_string().contains("phone_number"));

        cfg.phone_number = "+14206942069".into();
        cfg.signal_service.clear();
        let err = cfg.require_endpoint().unwrap_err();
        assert!(err.to_string().contains("signal_service"));
    }

    #[test]
    fn diagnostics_for_enabled_account() {
        let cfg = SignalAccountConfig {
            enabled: true,
            phone_number: "14206942069".into(),
            signal_service: "host:99999".into(),
            send_timeout_secs: 0,
            ..Default::default()
        };
        let diags = cfg.diagnostics();
        let errors: Vec<&str> = diags
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(errors, [
            "channels.signal.signal_service",
            "channels.signal.send_timeout_secs"
        ]);
        assert!(diags.iter().any(|d| d.category == "security"));
        assert!(
            diags
                .iter()
                .any(|d| d.path == "channels.signal.phone_number" && d.severity == Severity::Warning)
        );
    }

    #[test]
    fn disabled_account_is_not_checked() {
        assert!(SignalAccountConfig::default().diagnostics().is_empty());
    }
}
