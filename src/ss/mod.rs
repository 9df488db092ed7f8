//! Storage server bookkeeping: the registry, the state machine, and the
//! control channel used for heartbeats and proxied commands (§4.3).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::wire::{self, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsState {
    Active,
    Failed,
}

/// A storage server's view as held by the naming server (§3, §4.3).
#[derive(Debug, Clone)]
pub struct StorageServer {
    pub id: String,
    pub ip: String,
    pub nm_port: u32,
    pub client_port: u32,
    pub state: SsState,
    pub last_heartbeat: Instant,
}

/// The bidirectional control socket to one storage server. Both heartbeats
/// and naming-server-initiated commands (REPLICATE, SHUTDOWN) share this
/// same TCP connection, so sends and their matching replies are serialized
/// behind a single mutex rather than run through a separate actor task
/// (§9 design note) --- simpler than a channel-per-connection actor, at the
/// cost of blocking a second caller until the first's round trip completes.
pub struct ControlChannel {
    stream: AsyncMutex<TcpStream>,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Self {
        ControlChannel { stream: AsyncMutex::new(stream) }
    }

    /// Sends `message` and waits for the single reply that answers it.
    pub async fn send_recv(&self, message: &Message) -> Result<Message, wire::Error> {
        let mut stream = self.stream.lock().await;
        write_message(&mut *stream, message).await?;
        read_message(&mut *stream).await
    }
}

async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, message: &Message) -> Result<(), wire::Error> {
    message.write(w).await
}

async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message, wire::Error> {
    Message::read(r).await
}

/// Registry of known storage servers and their control channels (§4.3).
pub struct SsRegistry {
    servers: RwLock<HashMap<String, StorageServer>>,
    channels: RwLock<HashMap<String, Arc<ControlChannel>>>,
}

impl SsRegistry {
    pub fn new() -> Self {
        SsRegistry { servers: RwLock::new(HashMap::new()), channels: RwLock::new(HashMap::new()) }
    }

    /// Registers a storage server, whether seen for the first time or
    /// reconnecting after a failure. Reconnection reuses the same `id` and
    /// leaves every file/ACL record untouched --- the naming server does not
    /// forget metadata just because a SS dropped and came back (§4.3, S4).
    pub fn register(
        &self,
        id: &str,
        ip: &str,
        nm_port: u32,
        client_port: u32,
        control_stream: TcpStream,
    ) -> bool {
        let mut servers = self.servers.write().unwrap();
        let is_reconnect = servers.contains_key(id);
        servers.insert(
            id.to_string(),
            StorageServer {
                id: id.to_string(),
                ip: ip.to_string(),
                nm_port,
                client_port,
                state: SsState::Active,
                last_heartbeat: Instant::now(),
            },
        );
        drop(servers);
        self.channels.write().unwrap().insert(id.to_string(), Arc::new(ControlChannel::new(control_stream)));
        if is_reconnect {
            info!(ss_id = id, "storage server reconnected, marked active");
        } else {
            info!(ss_id = id, "storage server registered");
        }
        is_reconnect
    }

    pub fn mark_heartbeat(&self, id: &str) -> bool {
        let mut servers = self.servers.write().unwrap();
        match servers.get_mut(id) {
            Some(server) => {
                server.last_heartbeat = Instant::now();
                if server.state == SsState::Failed {
                    server.state = SsState::Active;
                    info!(ss_id = id, "storage server recovered");
                }
                true
            }
            None => false,
        }
    }

    /// Marks a server `Failed` outright, e.g. after a heartbeat poll times
    /// out or its control channel is found broken.
    pub fn mark_failed(&self, id: &str) {
        if let Some(server) = self.servers.write().unwrap().get_mut(id) {
            if server.state == SsState::Active {
                server.state = SsState::Failed;
                warn!(ss_id = id, "storage server marked failed: heartbeat unanswered");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<StorageServer> {
        self.servers.read().unwrap().get(id).cloned()
    }

    pub fn channel(&self, id: &str) -> Option<Arc<ControlChannel>> {
        self.channels.read().unwrap().get(id).cloned()
    }

    /// Drops a storage server's control channel, e.g. after a heartbeat
    /// round trip fails (§4.3: "on send/recv error ... close the channel").
    /// A fresh `Register` replaces it.
    pub fn close_channel(&self, id: &str) {
        self.channels.write().unwrap().remove(id);
    }

    pub fn list(&self) -> Vec<StorageServer> {
        self.servers.read().unwrap().values().cloned().collect()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.servers
            .read()
            .unwrap()
            .values()
            .filter(|s| s.state == SsState::Active)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Picks another active storage server for failover reads (§4.4),
    /// excluding `exclude`.
    pub fn pick_failover(&self, exclude: &str) -> Option<String> {
        self.servers
            .read()
            .unwrap()
            .values()
            .find(|s| s.state == SsState::Active && s.id != exclude)
            .map(|s| s.id.clone())
    }

    pub fn all_channels(&self) -> Vec<Arc<ControlChannel>> {
        self.channels.read().unwrap().values().cloned().collect()
    }

    /// Marks any server whose last heartbeat is older than `timeout` as
    /// `Failed` (§4.3). Intended to be called on a fixed tick from the
    /// heartbeat sweep task.
    pub fn sweep_timeouts(&self, timeout: std::time::Duration) {
        let mut servers = self.servers.write().unwrap();
        for server in servers.values_mut() {
            if server.state == SsState::Active && server.last_heartbeat.elapsed() > timeout {
                server.state = SsState::Failed;
                warn!(ss_id = %server.id, "storage server marked failed: heartbeat timeout");
            }
        }
    }
}

impl Default for SsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task: on every tick, each `Active` storage server already
/// silent for longer than `timeout` is marked `Failed` outright; the rest
/// get a `HEARTBEAT` ping over their control channel, marking `Active`
/// (recovering it if it had failed) on reply or `Failed` --- and the channel
/// closed --- on error or timeout (§4.3, §7). This is the sole source of
/// heartbeat traffic --- the naming server polls, storage servers never push.
pub async fn run_heartbeat_sweep(registry: Arc<SsRegistry>, interval: std::time::Duration, timeout: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for server in registry.list() {
            if server.state != SsState::Active {
                continue;
            }
            if server.last_heartbeat.elapsed() > timeout {
                registry.mark_failed(&server.id);
                registry.close_channel(&server.id);
                continue;
            }
            let Some(channel) = registry.channel(&server.id) else {
                registry.mark_failed(&server.id);
                continue;
            };
            let request = Message::request(crate::wire::MessageType::Heartbeat);
            match tokio::time::timeout(timeout, channel.send_recv(&request)).await {
                Ok(Ok(_)) => registry.mark_heartbeat(&server.id),
                _ => {
                    registry.mark_failed(&server.id);
                    registry.close_channel(&server.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn register_then_reconnect_reports_reconnect() {
        let (a, _b) = loopback_pair().await;
        let (c, _d) = loopback_pair().await;
        let registry = SsRegistry::new();
        assert!(!registry.register("ss1", "127.0.0.1", 9001, 9101, a));
        assert!(registry.register("ss1", "127.0.0.1", 9001, 9101, c));
    }

    #[tokio::test]
    async fn sweep_marks_stale_server_failed() {
        let (a, _b) = loopback_pair().await;
        let registry = SsRegistry::new();
        registry.register("ss1", "127.0.0.1", 9001, 9101, a);
        registry.sweep_timeouts(std::time::Duration::from_secs(0));
        assert_eq!(registry.get("ss1").unwrap().state, SsState::Failed);
    }

    #[tokio::test]
    async fn control_channel_round_trips_a_message() {
        let (client, server) = loopback_pair().await;
        let channel = ControlChannel::new(client);
        let responder = tokio::spawn(async move {
            let mut server = server;
            let msg = read_message(&mut server).await.unwrap();
            let reply = Message::success(msg.msg_type, Vec::new());
            write_message(&mut server, &reply).await.unwrap();
        });
        let request = Message::request(wire::MessageType::Heartbeat);
        let reply = channel.send_recv(&request).await.unwrap();
        assert!(reply.error_code.is_ok());
        responder.await.unwrap();
    }
}
