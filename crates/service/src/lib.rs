//! Process-wide session registry for the authentication front-end: tracks
//! authorized clients and nodes, allocates session ids, and runs the
//! activation state machine the handlers crate drives.

pub mod registry;
pub mod types;

pub use registry::Registry;
pub use types::{
    NodeInfo, NodeSession, ServerType, SessionError, UserSession, UserSessionId,
    NODE_SESSION_CAPACITY, USER_SESSION_CAPACITY,
};
