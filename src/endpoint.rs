use std::fmt;

use crate::ConfigError;

type Result<T> = std::result::Result<T, ConfigError>;

/// Broker address plus the credentials used to authenticate against it.
///
/// Validated on construction and immutable afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    username: String,
    vpn_name: String,
    password: String,
}

impl Endpoint {
    pub fn new<H, U, V, P>(host: H, username: U, vpn_name: V, password: P) -> Result<Self>
    where
        H: Into<String>,
        U: Into<String>,
        V: Into<String>,
        P: Into<String>,
    {
        let endpoint = Self {
            host: host.into(),
            username: username.into(),
            vpn_name: vpn_name.into(),
            password: password.into(),
        };

        if endpoint.host.trim().is_empty() {
            return Err(ConfigError::EmptyField("host".to_owned()));
        }
        if endpoint.username.is_empty() {
            return Err(ConfigError::EmptyField("username".to_owned()));
        }
        if endpoint.vpn_name.is_empty() {
            return Err(ConfigError::EmptyField("vpn_name".to_owned()));
        }
        Ok(endpoint)
    }

    /// Builds an endpoint from the `<host:port> <username@vpn> <password>`
    /// triple the sample programs take on the command line.
    pub fn from_args<H, P>(host: H, credentials: &str, password: P) -> Result<Self>
    where
        H: Into<String>,
        P: Into<String>,
    {
        let mut parts = credentials.split('@');
        let (Some(username), Some(vpn_name), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigError::MalformedCredentials(credentials.to_owned()));
        };
        Self::new(host, username, vpn_name, password)
    }

    /// The host as given, including any `tcp://` scheme.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The `host:port` part with any `tcp://` scheme stripped.
    pub fn address(&self) -> &str {
        self.host
            .strip_prefix("tcp://")
            .unwrap_or(&self.host)
            .trim_end_matches('/')
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn vpn_name(&self) -> &str {
        &self.vpn_name
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// the password is left out on purpose
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("vpn_name", &self.vpn_name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} on {}", self.username, self.vpn_name, self.host)
    }
}
