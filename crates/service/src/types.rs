//! Value types shared by the session registry.

use std::fmt;

/// A user session identifier, always in `[0, 32767]`.
pub type UserSessionId = i16;

/// Hard cap on the number of live user sessions, dictated by the client
/// protocol's fixed-width session-id field.
pub const USER_SESSION_CAPACITY: usize = 32768;

/// Hard cap on the number of live node sessions.
pub const NODE_SESSION_CAPACITY: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServerType {
    Entire,
    Adult,
    Clan,
    Test,
    Development,
    Trainee,
}

impl ServerType {
    /// Decimal wire representation used in ServerList replies and
    /// GameServerAuth requests.
    pub fn code(self) -> u32 {
        match self {
            Self::Entire => 0,
            Self::Adult => 1,
            Self::Clan => 2,
            Self::Test => 3,
            Self::Development => 4,
            Self::Trainee => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Entire,
            1 => Self::Adult,
            2 => Self::Clan,
            3 => Self::Test,
            4 => Self::Development,
            5 => Self::Trainee,
            _ => return None,
        })
    }
}

/// A snapshot of a Node's display fields, cached by the registry so that
/// `snapshot_authorized_servers` can answer without reaching back into any
/// live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub current_players: u32,
    pub max_players: u32,
    pub server_type: ServerType,
}

impl NodeInfo {
    /// Clamps `max_players` into `[0, 3600]`, per the data model.
    pub fn clamp_max_players(&mut self) {
        self.max_players = self.max_players.min(3600);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub username: String,
    pub session_id: UserSessionId,
    pub is_activated: bool,
    pub bound_node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSession {
    pub session_id: String,
    pub info: NodeInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// All 32768 user session ids are currently live. Unreachable in
    /// practice; callers should treat it as a fail-fast condition.
    NoSessionIdAvailable,
}

impl std::error::Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSessionIdAvailable => write!(f, "no user session id available"),
        }
    }
}
