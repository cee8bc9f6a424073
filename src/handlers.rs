//! Packet handlers: one pure(ish) function per packet id, each consuming
//! already-decoded blocks and returning an [`Outbound`] verdict. Handlers
//! never touch a socket directly — the connection's dispatch loop turns a
//! verdict into actual writes and, for `close`, a socket shutdown.

use std::sync::Arc;

use codec::ids;
use service::{NodeInfo, Registry, ServerType};
use sha2::{Digest, Sha256};

use crate::catalog::Catalog;

/// Shared collaborators every handler needs.
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<Registry>,
    pub catalog: Arc<dyn Catalog>,
}

/// A client that has completed the login exchange on this connection.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub username: String,
}

/// A node that has completed GameServerAuth on this connection.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: String,
    pub session_id: String,
}

/// What a handler wants the connection to do next: an optional reply frame
/// plus whether the connection should be closed after it is sent.
#[derive(Debug, Clone, Default)]
pub struct Outbound {
    pub reply: Option<(u16, Vec<String>)>,
    pub close: bool,
}

impl Outbound {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reply(id: u16, blocks: Vec<String>) -> Self {
        Self {
            reply: Some((id, blocks)),
            close: false,
        }
    }

    pub fn reply_and_close(id: u16, blocks: Vec<String>) -> Self {
        Self {
            reply: Some((id, blocks)),
            close: true,
        }
    }

    pub fn close() -> Self {
        Self {
            reply: None,
            close: true,
        }
    }
}

fn is_alphanumeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

fn sha256_hex(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());

    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn reject(code: u32) -> Vec<String> {
    vec![code.to_string()]
}

/// Builds the ServerList success payload: `1, 1, 0, username, "NULL",
/// displayname, session_id, 0, 0, rights, 1, count(nodes)`, then per-node
/// fields, then four `-1` blocks, then `0, 0`.
fn success_reply(
    username: &str,
    displayname: &str,
    session_id: i16,
    rights: u32,
    nodes: &[NodeInfo],
) -> Vec<String> {
    let mut blocks = vec![
        "1".to_string(),
        "1".to_string(),
        "0".to_string(),
        username.to_string(),
        "NULL".to_string(),
        displayname.to_string(),
        session_id.to_string(),
        "0".to_string(),
        "0".to_string(),
        rights.to_string(),
        "1".to_string(),
        nodes.len().to_string(),
    ];

    for node in nodes {
        blocks.push(node.node_id.clone());
        blocks.push(node.name.clone());
        blocks.push(node.address.clone());
        blocks.push(node.port.to_string());
        blocks.push(node.current_players.to_string());
        blocks.push(node.server_type.code().to_string());
    }

    blocks.extend(["-1", "-1", "-1", "-1", "0", "0"].map(str::to_string));
    blocks
}

/// Launcher (0x1010). Fixed seven-block reply, no state change.
pub fn handle_launcher() -> Outbound {
    Outbound::reply(ids::LAUNCHER, vec!["0".to_string(); 7])
}

/// ServerList (0x1100), the login exchange.
pub async fn handle_server_list(
    ctx: &HandlerContext,
    blocks: &[String],
) -> (Outbound, Option<ClientIdentity>) {
    let username = blocks.get(2).map(String::as_str).unwrap_or("");
    let password = blocks.get(3).map(String::as_str).unwrap_or("");

    if username.len() < 3 || !is_alphanumeric(username) {
        return (
            Outbound::reply_and_close(ids::SERVER_LIST, reject(ids::error_codes::ENTER_ID_ERROR)),
            None,
        );
    }

    if password.len() < 3 {
        return (
            Outbound::reply_and_close(
                ids::SERVER_LIST,
                reject(ids::error_codes::ENTER_PASSWORD_ERROR),
            ),
            None,
        );
    }

    let record = match ctx.catalog.lookup_user(username).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                Outbound::reply_and_close(ids::SERVER_LIST, reject(ids::error_codes::WRONG_USER)),
                None,
            );
        }
        Err(error) => {
            log::error!("catalog lookup failed for {username}: {error}");
            return (
                Outbound::reply_and_close(
                    ids::SERVER_LIST,
                    reject(ids::error_codes::ILLEGAL_EXCEPTION),
                ),
                None,
            );
        }
    };

    if sha256_hex(password, &record.salt) != record.password_hash {
        return (
            Outbound::reply_and_close(ids::SERVER_LIST, reject(ids::error_codes::WRONG_PW)),
            None,
        );
    }

    if record.rights == 0 {
        return (
            Outbound::reply_and_close(ids::SERVER_LIST, reject(ids::error_codes::BANNED)),
            None,
        );
    }

    let existing = ctx.registry.is_user_authorized(username);
    let active = ctx
        .registry
        .get_user_session_id(username)
        .map(|sid| ctx.registry.is_user_session_activated(sid))
        .unwrap_or(false);

    if existing && active {
        return (
            Outbound::reply_and_close(
                ids::SERVER_LIST,
                reject(ids::error_codes::ALREADY_LOGGED_IN),
            ),
            None,
        );
    }

    if existing {
        ctx.registry.unauthorize_user(username);
    }

    let session_id = match ctx.registry.authorize_user(username) {
        Ok(session_id) => session_id,
        Err(error) => {
            log::error!("session allocation failed for {username}: {error}");
            return (
                Outbound::reply_and_close(
                    ids::SERVER_LIST,
                    reject(ids::error_codes::ILLEGAL_EXCEPTION),
                ),
                None,
            );
        }
    };

    let identity = ClientIdentity {
        username: username.to_string(),
    };

    if record.displayname.is_empty() {
        return (
            Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::NEW_NICKNAME)),
            Some(identity),
        );
    }

    let nodes = ctx.registry.snapshot_authorized_servers();
    let reply = success_reply(username, &record.displayname, session_id, record.rights, &nodes);

    (
        Outbound::reply_and_close(ids::SERVER_LIST, reply),
        Some(identity),
    )
}

/// SetNickname (0x1101). Preconditions: the connection must already carry a
/// [`ClientIdentity`] from a prior ServerList exchange.
pub async fn handle_set_nickname(
    ctx: &HandlerContext,
    identity: &ClientIdentity,
    blocks: &[String],
) -> Outbound {
    let new_nickname = blocks.first().map(String::as_str).unwrap_or("");

    if new_nickname.len() <= 3 || !is_alphanumeric(new_nickname) {
        return Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::ILLEGAL_NICKNAME));
    }

    if new_nickname.len() > 16 {
        return Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::NICKNAME_TOO_LONG));
    }

    match ctx.catalog.displayname_taken(new_nickname).await {
        Ok(true) => {
            return Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::NICKNAME_TAKEN));
        }
        Ok(false) => {}
        Err(error) => {
            log::error!("catalog displayname_taken failed: {error}");
            return Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::ILLEGAL_EXCEPTION));
        }
    }

    if let Err(error) = ctx
        .catalog
        .update_displayname(&identity.username, new_nickname)
        .await
    {
        log::error!("catalog update_displayname failed: {error}");
        return Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::ILLEGAL_EXCEPTION));
    }

    let rights = match ctx.catalog.lookup_user(&identity.username).await {
        Ok(Some(record)) => record.rights,
        _ => {
            return Outbound::reply(ids::SERVER_LIST, reject(ids::error_codes::ILLEGAL_EXCEPTION));
        }
    };

    let session_id = ctx
        .registry
        .get_user_session_id(&identity.username)
        .unwrap_or(0);
    let nodes = ctx.registry.snapshot_authorized_servers();
    let reply = success_reply(&identity.username, new_nickname, session_id, rights, &nodes);

    Outbound::reply_and_close(ids::SERVER_LIST, reply)
}

/// GameServerAuth (internal). Validates and admits a node.
pub async fn handle_game_server_auth(
    ctx: &HandlerContext,
    blocks: &[String],
) -> (Outbound, Option<NodeIdentity>) {
    let error_code: u32 = blocks
        .first()
        .and_then(|value| value.parse().ok())
        .unwrap_or(ids::internal_status::SERVER_ERROR_OTHER);

    if error_code != ids::internal_status::SUCCESS {
        return (Outbound::none(), None);
    }

    if ctx.registry.authorized_server_count() >= service::NODE_SESSION_CAPACITY {
        return (
            Outbound::reply(
                ids::internal::GAME_SERVER_AUTHENTICATION,
                reject(ids::internal_status::SERVER_LIMIT_REACHED),
            ),
            None,
        );
    }

    let node_id = blocks.get(1).cloned().unwrap_or_default();
    let name = blocks.get(2).cloned().unwrap_or_default();
    let address = blocks.get(3).cloned().unwrap_or_default();
    let port: Option<u16> = blocks.get(4).and_then(|value| value.parse().ok());
    let server_type_code: Option<u32> = blocks.get(5).and_then(|value| value.parse().ok());
    let current_players: Option<u32> = blocks.get(6).and_then(|value| value.parse().ok());
    let max_players: Option<u32> = blocks.get(7).and_then(|value| value.parse().ok());

    let basics_valid = name.len() >= 3
        && is_alphanumeric(&name)
        && !node_id.is_empty()
        && is_alphanumeric(&node_id)
        && port.is_some()
        && current_players.is_some()
        && max_players.is_some();

    if !basics_valid {
        return (
            Outbound::reply_and_close(
                ids::internal::GAME_SERVER_AUTHENTICATION,
                reject(ids::internal_status::SERVER_ERROR_OTHER),
            ),
            None,
        );
    }

    let Some(server_type) = server_type_code.and_then(ServerType::from_code) else {
        return (
            Outbound::reply_and_close(
                ids::internal::GAME_SERVER_AUTHENTICATION,
                reject(ids::internal_status::INVALID_SERVER_TYPE),
            ),
            None,
        );
    };

    let port = port.unwrap();
    let current_players = current_players.unwrap();
    let max_players = max_players.unwrap();

    let active_servers = match ctx.catalog.list_active_servers().await {
        Ok(servers) => servers,
        Err(error) => {
            log::error!("catalog list_active_servers failed: {error}");
            return (
                Outbound::reply_and_close(
                    ids::internal::GAME_SERVER_AUTHENTICATION,
                    reject(ids::internal_status::SERVER_ERROR_OTHER),
                ),
                None,
            );
        }
    };

    let corroborated = active_servers
        .iter()
        .any(|server| server.node_id == node_id && server.address == address && server.port == port);

    if !corroborated {
        return (
            Outbound::reply_and_close(
                ids::internal::GAME_SERVER_AUTHENTICATION,
                reject(ids::internal_status::INVALID_SESSION_MATCH),
            ),
            None,
        );
    }

    if ctx.registry.is_server_authorized(&node_id) {
        return (
            Outbound::reply_and_close(
                ids::internal::GAME_SERVER_AUTHENTICATION,
                reject(ids::internal_status::ALREADY_AUTHORIZED),
            ),
            None,
        );
    }

    let mut info = NodeInfo {
        node_id: node_id.clone(),
        name,
        address,
        port,
        current_players,
        max_players,
        server_type,
    };
    info.clamp_max_players();

    let session_id = ctx.registry.authorize_server(info);
    let reply = vec![ids::internal_status::SUCCESS.to_string(), session_id.clone()];

    (
        Outbound::reply(ids::internal::GAME_SERVER_AUTHENTICATION, reply),
        Some(NodeIdentity {
            node_id,
            session_id,
        }),
    )
}

/// GameServerStatus (internal). Heartbeat from an authorized node.
pub fn handle_game_server_status(
    ctx: &HandlerContext,
    identity: Option<&NodeIdentity>,
    blocks: &[String],
) -> Outbound {
    let Some(identity) = identity else {
        log::warn!("game server status from an unauthorized connection");
        return Outbound::close();
    };

    if !ctx.registry.is_server_authorized(&identity.node_id) {
        log::warn!(
            "game server status from a node no longer authorized: {}",
            identity.node_id
        );
        return Outbound::close();
    }

    let current_players: u32 = blocks.get(3).and_then(|value| value.parse().ok()).unwrap_or(0);
    ctx.registry.update_server_status(&identity.node_id, current_players);

    Outbound::none()
}

/// InternalClientAuth (internal). Join adjudication for a client presenting
/// credentials to an already-authorized node.
pub fn handle_internal_client_auth(
    ctx: &HandlerContext,
    identity: Option<&NodeIdentity>,
    blocks: &[String],
) -> Outbound {
    let Some(identity) = identity else {
        log::warn!("internal client auth from an unauthorized connection");
        return Outbound::close();
    };

    let error_code: u32 = blocks
        .first()
        .and_then(|value| value.parse().ok())
        .unwrap_or(ids::internal_status::SERVER_ERROR_OTHER);
    let claimed_sid: i16 = blocks.get(1).and_then(|value| value.parse().ok()).unwrap_or(-1);
    let claimed_username = blocks.get(2).cloned().unwrap_or_default();
    let claimed_rights = blocks.get(3).cloned().unwrap_or_default();

    let reply = |code: u32| {
        Outbound::reply(
            ids::internal::CLIENT_AUTHENTICATION,
            vec![
                code.to_string(),
                claimed_username.clone(),
                claimed_sid.to_string(),
                claimed_rights.clone(),
            ],
        )
    };

    let Some(stored_sid) = ctx.registry.get_user_session_id(&claimed_username) else {
        return reply(ids::internal_status::INVALID_KEY_SESSION);
    };

    if claimed_sid != stored_sid {
        return reply(ids::internal_status::INVALID_SESSION_MATCH);
    }

    if ctx.registry.is_user_session_activated(stored_sid) {
        if error_code == ids::internal_status::END_CONNECTION {
            ctx.registry.unauthorize_user(&claimed_username);
            return Outbound::none();
        }

        return reply(ids::internal_status::ALREADY_AUTHORIZED);
    }

    ctx.registry
        .activate_user_session(stored_sid, &identity.session_id);

    reply(ids::internal_status::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ActiveServer;
    use async_trait::async_trait;

    struct FakeCatalog {
        displayname_taken: bool,
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn lookup_user(&self, _username: &str) -> anyhow::Result<Option<crate::catalog::UserRecord>> {
            Ok(None)
        }

        async fn displayname_taken(&self, _name: &str) -> anyhow::Result<bool> {
            Ok(self.displayname_taken)
        }

        async fn update_displayname(&self, _username: &str, _new: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list_active_servers(&self) -> anyhow::Result<Vec<ActiveServer>> {
            Ok(Vec::new())
        }
    }

    fn set_nickname_ctx(displayname_taken: bool) -> HandlerContext {
        HandlerContext {
            registry: Arc::new(Registry::new()),
            catalog: Arc::new(FakeCatalog { displayname_taken }),
        }
    }

    #[tokio::test]
    async fn set_nickname_illegal_nickname_replies_without_closing() {
        let ctx = set_nickname_ctx(false);
        let identity = ClientIdentity {
            username: "alice".to_string(),
        };

        let outbound = handle_set_nickname(&ctx, &identity, &["a-b".to_string()]).await;
        let (id, blocks) = outbound.reply.expect("a rejection reply is sent");

        assert_eq!(id, ids::SERVER_LIST);
        assert_eq!(blocks[0], ids::error_codes::ILLEGAL_NICKNAME.to_string());
        assert!(!outbound.close, "an illegal nickname must not disconnect the client");
    }

    #[tokio::test]
    async fn set_nickname_too_long_replies_without_closing() {
        let ctx = set_nickname_ctx(false);
        let identity = ClientIdentity {
            username: "alice".to_string(),
        };

        let outbound = handle_set_nickname(&ctx, &identity, &["a".repeat(17)]).await;
        let (id, blocks) = outbound.reply.expect("a rejection reply is sent");

        assert_eq!(id, ids::SERVER_LIST);
        assert_eq!(blocks[0], ids::error_codes::NICKNAME_TOO_LONG.to_string());
        assert!(!outbound.close, "an over-long nickname must not disconnect the client");
    }

    #[tokio::test]
    async fn set_nickname_taken_replies_without_closing() {
        let ctx = set_nickname_ctx(true);
        let identity = ClientIdentity {
            username: "alice".to_string(),
        };

        let outbound = handle_set_nickname(&ctx, &identity, &["Allie".to_string()]).await;
        let (id, blocks) = outbound.reply.expect("a rejection reply is sent");

        assert_eq!(id, ids::SERVER_LIST);
        assert_eq!(blocks[0], ids::error_codes::NICKNAME_TAKEN.to_string());
        assert!(!outbound.close, "a taken nickname must not disconnect the client");
    }

    #[test]
    fn success_reply_matches_the_documented_block_order() {
        let blocks = success_reply("alice", "Ally", 0, 1, &[]);

        assert_eq!(
            blocks,
            vec![
                "1", "1", "0", "alice", "NULL", "Ally", "0", "0", "0", "1", "1", "0", "-1", "-1",
                "-1", "-1", "0", "0",
            ]
        );
    }

    #[test]
    fn success_reply_includes_one_block_group_per_node() {
        let node = NodeInfo {
            node_id: "n1".to_string(),
            name: "Alpha".to_string(),
            address: "10.0.0.1".to_string(),
            port: 7777,
            current_players: 3,
            max_players: 100,
            server_type: ServerType::Entire,
        };

        let blocks = success_reply("alice", "Ally", 0, 1, &[node]);

        assert_eq!(blocks[11], "1");
        assert_eq!(&blocks[12..18], ["n1", "Alpha", "10.0.0.1", "7777", "3", "0"]);
    }

    #[test]
    fn launcher_reply_is_seven_zero_blocks() {
        let outbound = handle_launcher();
        let (id, blocks) = outbound.reply.expect("launcher always replies");

        assert_eq!(id, ids::LAUNCHER);
        assert_eq!(blocks, vec!["0".to_string(); 7]);
        assert!(!outbound.close);
    }

    #[test]
    fn sha256_hex_is_deterministic_lowercase_and_sensitive_to_input() {
        let digest = sha256_hex("pw", "s");

        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, sha256_hex("pw", "s"));
        assert_ne!(digest, sha256_hex("pw", "t"));
        assert_ne!(digest, sha256_hex("pw2", "s"));
    }

    #[test]
    fn is_alphanumeric_rejects_empty_and_symbols() {
        assert!(!is_alphanumeric(""));
        assert!(!is_alphanumeric("a-b"));
        assert!(is_alphanumeric("alice1"));
    }
}
