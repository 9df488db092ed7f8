//! Connection acceptance and per-connection dispatch (§4.1, §5).
//!
//! The first message on every connection decides its fate: `REGISTER_SS`
//! hands the socket to the storage-server registry as a control channel;
//! `REGISTER_CLIENT` opens a session and enters the client request loop;
//! anything else gets the connection closed.

mod ops;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::Config;
use crate::metadata::Store;
use crate::session::{SessionError, SessionManager};
use crate::ss::SsRegistry;
use crate::wire::{ErrorCode, Message, MessageType};

/// Shared state reachable from every connection task.
pub struct NamingServer {
    pub store: Arc<Store>,
    pub ss_registry: Arc<SsRegistry>,
    pub sessions: Arc<SessionManager>,
    pub config: Config,
}

impl NamingServer {
    pub fn new(config: Config, store: Store) -> Arc<Self> {
        Arc::new(NamingServer {
            store: Arc::new(store),
            ss_registry: Arc::new(SsRegistry::new()),
            sessions: Arc::new(SessionManager::new()),
            config,
        })
    }

    /// Runs the accept loop until `shutdown` is notified (§7).
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move { server.handle_connection(socket, addr).await; });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.notified() => {
                    info!("accept loop shutting down");
                    return;
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut socket: TcpStream, addr: SocketAddr) {
        let first = match Message::read(&mut socket).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%addr, error = %e, "failed to read opening message");
                return;
            }
        };

        match first.msg_type {
            MessageType::RegisterSs => self.handle_ss_registration(socket, &first).await,
            MessageType::RegisterClient => self.handle_client(socket, addr, &first).await,
            other => {
                warn!(%addr, msg_type = ?other, "connection did not open with a registration message; closing");
            }
        }
    }

    async fn handle_ss_registration(&self, socket: TcpStream, first: &Message) {
        let ss_id = first.filename.clone();
        let ip = first.ss_ip.clone();
        let client_port = first.ss_port;
        let nm_port = first.flags;

        let reconnect = self.ss_registry.register(&ss_id, &ip, nm_port, client_port, socket);
        for name in first.data.split(|&b| b == b'\n').filter(|s| !s.is_empty()) {
            if let Ok(name) = std::str::from_utf8(name) {
                if reconnect {
                    self.store.reassert_storage_server(name, &ss_id);
                } else {
                    self.store.ensure_system_file(name, &ss_id);
                }
            }
        }
    }

    async fn handle_client(self: Arc<Self>, mut socket: TcpStream, addr: SocketAddr, first: &Message) {
        let username = first.username.clone();
        if username.is_empty() {
            return;
        }

        match self.sessions.login(&username, addr.ip()) {
            Ok(()) => {}
            Err(SessionError::AlreadyLoggedIn) => {
                let reply = Message::error(MessageType::RegisterClient, ErrorCode::FileLocked, "already logged in");
                let _ = reply.write(&mut socket).await;
                return;
            }
            Err(SessionError::NotLoggedIn) => unreachable!("login() never returns NotLoggedIn"),
        }
        let ack = Message::success(MessageType::RegisterClient, Vec::new());
        if ack.write(&mut socket).await.is_err() {
            self.sessions.logout(&username);
            return;
        }

        loop {
            let request = match Message::read(&mut socket).await {
                Ok(msg) => msg,
                Err(_) => break,
            };
            let reply = self.dispatch(&username, &request).await;
            if reply.write(&mut socket).await.is_err() {
                break;
            }
        }

        self.sessions.logout(&username);
        info!(%username, "client session ended");
    }

    /// Routes a request to its operation handler (§4.1).
    async fn dispatch(&self, username: &str, msg: &Message) -> Message {
        match msg.msg_type {
            MessageType::Create => ops::create(self, username, msg).await,
            MessageType::Read | MessageType::Stream => ops::read(self, username, msg).await,
            MessageType::Write | MessageType::Undo => ops::write(self, username, msg).await,
            MessageType::Delete => ops::delete(self, username, msg).await,
            MessageType::Info => ops::info(self, username, msg).await,
            MessageType::View => ops::view(self, username, msg).await,
            MessageType::ListSs => ops::list_ss(self, username, msg).await,
            MessageType::ListUsers => ops::list_users(self, username, msg).await,
            MessageType::Search => ops::search(self, username, msg).await,
            MessageType::CreateFolder => ops::create_folder(self, username, msg).await,
            MessageType::ViewFolder => ops::view_folder(self, username, msg).await,
            MessageType::Move => ops::r#move(self, username, msg).await,
            MessageType::Checkpoint => ops::checkpoint(self, username, msg).await,
            MessageType::ListCheckpoints => ops::list_checkpoints(self, username, msg).await,
            MessageType::ViewCheckpoint | MessageType::Revert => ops::view_or_revert_checkpoint(self, username, msg).await,
            MessageType::AddAccess => ops::add_access(self, username, msg).await,
            MessageType::RemAccess => ops::rem_access(self, username, msg).await,
            MessageType::RequestAccess => ops::request_access(self, username, msg).await,
            MessageType::ViewRequests => ops::view_requests(self, username, msg).await,
            MessageType::RespondRequest => ops::respond_request(self, username, msg).await,
            MessageType::Exec => ops::exec(self, username, msg).await,
            MessageType::RegisterClient
            | MessageType::RegisterSs
            | MessageType::Heartbeat
            | MessageType::Replicate
            | MessageType::Shutdown => {
                Message::error(msg.msg_type, ErrorCode::InvalidRequest, "not a client-issued operation")
            }
        }
    }

    /// Sends `SHUTDOWN` to every active storage server's control channel
    /// (§7, best-effort --- failures are logged, not propagated).
    pub async fn broadcast_shutdown(&self) {
        let shutdown = Message::request(MessageType::Shutdown);
        for channel in self.ss_registry.all_channels() {
            if let Err(e) = channel.send_recv(&shutdown).await {
                warn!(error = %e, "failed to notify storage server of shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MessageType;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn test_server() -> Arc<NamingServer> {
        let config = Config {
            port: 0,
            data_dir: std::env::temp_dir(),
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 60,
            max_clients: 10,
        };
        NamingServer::new(config, Store::new())
    }

    #[tokio::test]
    async fn create_without_active_ss_reports_unavailable() {
        let server = test_server();
        let mut msg = Message::request(MessageType::Create);
        msg.filename = "notes.txt".into();
        let reply = server.dispatch("alice", &msg).await;
        assert_eq!(reply.error_code, ErrorCode::SsUnavailable);
    }

    #[tokio::test]
    async fn read_unknown_file_reports_not_found() {
        let server = test_server();
        let mut msg = Message::request(MessageType::Read);
        msg.filename = "ghost.txt".into();
        let reply = server.dispatch("alice", &msg).await;
        assert_eq!(reply.error_code, ErrorCode::FileNotFound);
    }

    #[tokio::test]
    async fn delete_by_non_owner_is_denied() {
        let server = test_server();
        server.store.insert_file(crate::metadata::file::FileRecord::new("a.txt", "alice", "ss1", "")).unwrap();
        let mut msg = Message::request(MessageType::Delete);
        msg.filename = "a.txt".into();
        let reply = server.dispatch("bob", &msg).await;
        assert_eq!(reply.error_code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn dispatching_a_control_only_message_is_rejected() {
        let server = test_server();
        let msg = Message::request(MessageType::Heartbeat);
        let reply = server.dispatch("alice", &msg).await;
        assert_eq!(reply.error_code, ErrorCode::InvalidRequest);
    }

    #[allow(dead_code)]
    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }
}
