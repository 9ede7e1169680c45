use std::mem;
use std::time::Duration;

use crate::message::InboundMessage;
use crate::session::{EventHandler, MessageHandler, SessionEvent};
use crate::transport::{ConnectOptions, DEFAULT_CONNECT_TIMEOUT_MS};
use crate::{ConfigError, Context, Endpoint, Session, SessionError};

pub const DEFAULT_SUBCONFIRM_TIMEOUT_MS: u64 = 10_000;

type Result<T> = std::result::Result<T, SessionError>;

#[derive(Default)]
struct UncheckedSessionProps {
    // Note: required params, unless a whole endpoint is given
    endpoint: Option<Endpoint>,
    host_name: Option<String>,
    vpn_name: Option<String>,
    username: Option<String>,
    password: Option<String>,

    // Note: optional params
    connect_timeout_ms: Option<u64>,
    subconfirm_timeout_ms: Option<u64>,
    tcp_nodelay: Option<bool>,
    client_name: Option<String>,
    application_description: Option<String>,
}

/// `SessionBuilder` allows setting up a session with options that are not
/// exposed by [`Context::session`] such as timeouts and the client name.
///
/// `build` only creates the session, call [`Session::connect`] afterwards.
pub struct SessionBuilder {
    context: Context,
    props: UncheckedSessionProps,

    // callbacks
    on_message: Option<MessageHandler>,
    on_event: Option<EventHandler>,
}

impl SessionBuilder {
    pub(crate) fn new(context: Context) -> Self {
        Self {
            context,
            props: UncheckedSessionProps::default(),
            on_message: None,
            on_event: None,
        }
    }

    pub fn build(mut self) -> Result<Session> {
        let config = CheckedSessionProps::try_from(mem::take(&mut self.props))?;
        let id = self.context.next_session_id()?;

        let options = ConnectOptions {
            client_name: config
                .client_name
                .unwrap_or_else(|| default_client_name(id)),
            application_description: config.application_description,
            connect_timeout: config.connect_timeout,
            tcp_nodelay: config.tcp_nodelay,
        };

        let session = Session::new(
            self.context.clone(),
            id,
            config.endpoint,
            options,
            config.subconfirm_timeout,
            self.on_message,
            self.on_event,
        )?;
        self.context.register(&session);
        Ok(session)
    }

    /// Sets host, vpn, username and password in one go.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.props.endpoint = Some(endpoint);
        self
    }

    pub fn host_name<H: Into<String>>(mut self, host_name: H) -> Self {
        self.props.host_name = Some(host_name.into());
        self
    }

    pub fn vpn_name<V: Into<String>>(mut self, vpn_name: V) -> Self {
        self.props.vpn_name = Some(vpn_name.into());
        self
    }
    pub fn username<U: Into<String>>(mut self, username: U) -> Self {
        self.props.username = Some(username.into());
        self
    }
    pub fn password<P: Into<String>>(mut self, password: P) -> Self {
        self.props.password = Some(password.into());
        self
    }

    pub fn on_message<F>(mut self, on_message: F) -> Self
    where
        F: FnMut(InboundMessage) + Send + 'static,
    {
        self.on_message = Some(Box::new(on_message));
        self
    }

    pub fn on_event<F>(mut self, on_event: F) -> Self
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        self.on_event = Some(Box::new(on_event));
        self
    }

    pub fn connect_timeout_ms(mut self, connect_timeout_ms: u64) -> Self {
        self.props.connect_timeout_ms = Some(connect_timeout_ms);
        self
    }
    pub fn subconfirm_timeout_ms(mut self, subconfirm_timeout_ms: u64) -> Self {
        self.props.subconfirm_timeout_ms = Some(subconfirm_timeout_ms);
        self
    }
    pub fn tcp_nodelay(mut self, tcp_nodelay: bool) -> Self {
        self.props.tcp_nodelay = Some(tcp_nodelay);
        self
    }
    pub fn application_description<D: Into<String>>(mut self, application_description: D) -> Self {
        self.props.application_description = Some(application_description.into());
        self
    }
    pub fn client_name<C: Into<String>>(mut self, client_name: C) -> Self {
        self.props.client_name = Some(client_name.into());
        self
    }
}

fn default_client_name(session_id: u64) -> String {
    format!(
        "{}/{}/#{:08}",
        env!("CARGO_PKG_NAME"),
        std::process::id(),
        session_id
    )
}

struct CheckedSessionProps {
    endpoint: Endpoint,
    connect_timeout: Duration,
    subconfirm_timeout: Duration,
    tcp_nodelay: bool,
    client_name: Option<String>,
    application_description: Option<String>,
}

fn required(name: &str, value: Option<String>) -> std::result::Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingRequiredArgs(name.to_owned()))
}

impl TryFrom<UncheckedSessionProps> for CheckedSessionProps {
    type Error = ConfigError;

    fn try_from(value: UncheckedSessionProps) -> std::result::Result<Self, Self::Error> {
        let endpoint = match value.endpoint {
            Some(endpoint) => endpoint,
            None => Endpoint::new(
                required("host_name", value.host_name)?,
                required("username", value.username)?,
                required("vpn_name", value.vpn_name)?,
                required("password", value.password)?,
            )?,
        };

        let connect_timeout_ms = match value.connect_timeout_ms {
            Some(x) if x < 1 => {
                return Err(ConfigError::InvalidRange(
                    "connect_timeout_ms".to_owned(),
                    ">= 1".to_owned(),
                    x.to_string(),
                ));
            }
            Some(x) => x,
            None => DEFAULT_CONNECT_TIMEOUT_MS,
        };

        let subconfirm_timeout_ms = match value.subconfirm_timeout_ms {
            Some(x) if x < 1000 => {
                return Err(ConfigError::InvalidRange(
                    "subconfirm_timeout_ms".to_owned(),
                    ">= 1000".to_owned(),
                    x.to_string(),
                ));
            }
            Some(x) => x,
            None => DEFAULT_SUBCONFIRM_TIMEOUT_MS,
        };

        let client_name = match value.client_name {
            Some(x) if x.trim().is_empty() => {
                return Err(ConfigError::EmptyField("client_name".to_owned()));
            }
            x => x,
        };

        Ok(Self {
            endpoint,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            subconfirm_timeout: Duration::from_millis(subconfirm_timeout_ms),
            tcp_nodelay: value.tcp_nodelay.unwrap_or(true),
            client_name,
            application_description: value.application_description,
        })
    }
}
