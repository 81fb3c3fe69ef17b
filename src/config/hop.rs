//! Proxy hop descriptors
//!
//! A hop is written as `<scheme>://[user:pass@]host:port`, with `socks5` and
//! `http` as the supported schemes.

use crate::error::ConfigError;
use crate::proto::socks5::MAX_CREDENTIAL_LEN;
use crate::proto::TargetAddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Protocol spoken to a hop
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// SOCKS5, optionally with username/password
    Socks5,
    /// HTTP CONNECT
    Http,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Socks5 => write!(f, "socks5"),
            Scheme::Http => write!(f, "http"),
        }
    }
}

/// Username/password pair
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create a new pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check both fields fit a RFC1929 subnegotiation
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("username", &self.username), ("password", &self.password)] {
            if value.is_empty() {
                return Err(ConfigError::InvalidCredentials(format!("empty {}", field)));
            }
            if value.len() > MAX_CREDENTIAL_LEN {
                return Err(ConfigError::InvalidCredentials(format!(
                    "{} longer than {} bytes",
                    field, MAX_CREDENTIAL_LEN
                )));
            }
        }
        Ok(())
    }
}

// Never print the password
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One proxy in the chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HopSpec {
    /// Protocol spoken to the hop
    pub scheme: Scheme,
    /// Host name or IP literal
    pub host: String,
    /// Port
    pub port: u16,
    /// Credentials presented to the hop
    pub credentials: Option<Credentials>,
}

impl HopSpec {
    /// Address the hop listens on
    pub fn addr(&self) -> TargetAddr {
        TargetAddr::from_host(&self.host, self.port)
    }

    fn to_url_string(&self) -> String {
        match &self.credentials {
            Some(c) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme, c.username, c.password, self.host, self.port
            ),
            None => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

impl FromStr for HopSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| ConfigError::InvalidUrl(s.to_string(), e))?;

        let scheme = match url.scheme() {
            "socks5" | "socks5h" => Scheme::Socks5,
            "http" => Scheme::Http,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::MissingHost(s.to_string()))?
            .to_string();

        // url elides the default port of special schemes
        let port = match scheme {
            Scheme::Http => url.port_or_known_default(),
            Scheme::Socks5 => url.port(),
        }
        .ok_or_else(|| ConfigError::MissingPort(s.to_string()))?;

        let credentials = match (url.username(), url.password()) {
            ("", None) => None,
            (username, Some(password)) if !username.is_empty() => {
                let credentials = Credentials::new(username, password);
                credentials.validate()?;
                Some(credentials)
            }
            _ => {
                return Err(ConfigError::InvalidCredentials(
                    "expected user:pass".to_string(),
                ))
            }
        };

        Ok(HopSpec {
            scheme,
            host,
            port,
            credentials,
        })
    }
}

impl TryFrom<String> for HopSpec {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HopSpec> for String {
    fn from(hop: HopSpec) -> Self {
        hop.to_url_string()
    }
}

impl fmt::Display for HopSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.credentials {
            Some(c) => write!(
                f,
                "{}://{}:***@{}:{}",
                self.scheme, c.username, self.host, self.port
            ),
            None => write!(f, "{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}
