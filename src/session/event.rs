use core::fmt;

/// Notifications raised on a session's delivery thread.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SessionEvent {
    UpNotice,
    ConnectFailedError,
    DownError,
    DisconnectedNotice,
    SubscriptionOk,
    SubscriptionError,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::UpNotice => "Session up",
            Self::ConnectFailedError => "Session connect failed",
            Self::DownError => "Session down",
            Self::DisconnectedNotice => "Session disconnected",
            Self::SubscriptionOk => "Subscription ok",
            Self::SubscriptionError => "Subscription error",
        };
        write!(f, "{}", message)
    }
}

/// Lifecycle of a session. Each session is single use: once it reaches
/// `Closed` or `Failed` a new one has to be created to connect again.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
