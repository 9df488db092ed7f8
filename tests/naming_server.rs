//! End-to-end tests driving the dispatcher over real TCP loopback sockets,
//! matching the scenarios in the naming server's behavioral spec.

use std::sync::Arc;

use naming_server::config::Config;
use naming_server::dispatch::NamingServer;
use naming_server::wire::{ErrorCode, Message, MessageType};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

async fn spawn_server() -> (Arc<NamingServer>, std::net::SocketAddr, tempfile::TempDir) {
    let data_dir = tempfile::tempdir().unwrap();
    let config = Config {
        port: 0,
        data_dir: data_dir.path().to_path_buf(),
        heartbeat_interval_secs: 3600,
        heartbeat_timeout_secs: 3600,
        max_clients: 10,
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = NamingServer::new(config, naming_server::metadata::Store::new());
    let run_server = Arc::clone(&server);
    let shutdown = Arc::new(Notify::new());
    tokio::spawn(run_server.run(listener, shutdown));
    (server, addr, data_dir)
}

/// Connects a fake storage server and spawns a responder that answers every
/// control-channel request (CREATE/DELETE/MOVE/CHECKPOINT forwards) with
/// `RESP_SUCCESS`, standing in for the real storage server's control side.
async fn register_storage_server(addr: std::net::SocketAddr, ss_id: &str, client_port: u32) -> tokio::task::JoinHandle<()> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut msg = Message::request(MessageType::RegisterSs);
    msg.filename = ss_id.to_string();
    msg.ss_ip = "127.0.0.1".to_string();
    msg.ss_port = client_port;
    msg.write(&mut stream).await.unwrap();
    tokio::spawn(async move {
        loop {
            let request = match Message::read(&mut stream).await {
                Ok(r) => r,
                Err(_) => break,
            };
            let reply = Message::success(request.msg_type, Vec::new());
            if reply.write(&mut stream).await.is_err() {
                break;
            }
        }
    })
}

async fn login(addr: std::net::SocketAddr, username: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut msg = Message::request(MessageType::RegisterClient);
    msg.username = username.to_string();
    msg.write(&mut stream).await.unwrap();
    let reply = Message::read(&mut stream).await.unwrap();
    assert_eq!(reply.error_code, ErrorCode::Success);
    stream
}

async fn roundtrip(stream: &mut TcpStream, msg: Message) -> Message {
    msg.write(stream).await.unwrap();
    Message::read(stream).await.unwrap()
}

#[tokio::test]
async fn create_then_read_happy_path() {
    let (_server, addr, _dir) = spawn_server().await;
    let _ss = register_storage_server(addr, "ss1", 9100).await;
    let mut client = login(addr, "alice").await;

    let mut create_msg = Message::request(MessageType::Create);
    create_msg.filename = "report.txt".into();
    let reply = roundtrip(&mut client, create_msg).await;
    assert_eq!(reply.error_code, ErrorCode::SsInfo);
    assert_eq!(reply.ss_port, 9100);

    let mut read_msg = Message::request(MessageType::Read);
    read_msg.filename = "report.txt".into();
    let reply = roundtrip(&mut client, read_msg).await;
    assert_eq!(reply.error_code, ErrorCode::SsInfo);
    assert_eq!(reply.ss_port, 9100);
}

#[tokio::test]
async fn read_without_access_is_denied() {
    let (_server, addr, _dir) = spawn_server().await;
    let _ss = register_storage_server(addr, "ss1", 9100).await;
    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;

    let mut create_msg = Message::request(MessageType::Create);
    create_msg.filename = "secret.txt".into();
    roundtrip(&mut alice, create_msg).await;

    let mut read_msg = Message::request(MessageType::Read);
    read_msg.filename = "secret.txt".into();
    let reply = roundtrip(&mut bob, read_msg).await;
    assert_eq!(reply.error_code, ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn second_login_for_same_user_is_file_locked() {
    let (_server, addr, _dir) = spawn_server().await;
    let _first = login(addr, "alice").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut msg = Message::request(MessageType::RegisterClient);
    msg.username = "alice".into();
    msg.write(&mut stream).await.unwrap();
    let reply = Message::read(&mut stream).await.unwrap();
    assert_eq!(reply.error_code, ErrorCode::FileLocked);
}

#[tokio::test]
async fn access_request_lifecycle_grants_acl_on_approval() {
    let (_server, addr, _dir) = spawn_server().await;
    let _ss = register_storage_server(addr, "ss1", 9100).await;
    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;

    let mut create_msg = Message::request(MessageType::Create);
    create_msg.filename = "shared.txt".into();
    roundtrip(&mut alice, create_msg).await;

    let mut request_msg = Message::request(MessageType::RequestAccess);
    request_msg.filename = "shared.txt".into();
    request_msg.flags = 3; // ReadWrite
    let reply = roundtrip(&mut bob, request_msg).await;
    assert_eq!(reply.error_code, ErrorCode::Success);
    let request_id = u64::from_le_bytes(reply.data.try_into().unwrap());

    let mut respond_msg = Message::request(MessageType::RespondRequest);
    respond_msg.filename = "shared.txt".into();
    respond_msg.request_id = request_id;
    respond_msg.flags = 1; // approve
    let reply = roundtrip(&mut alice, respond_msg).await;
    assert_eq!(reply.error_code, ErrorCode::Success);

    let mut write_msg = Message::request(MessageType::Write);
    write_msg.filename = "shared.txt".into();
    let reply = roundtrip(&mut bob, write_msg).await;
    assert_eq!(reply.error_code, ErrorCode::SsInfo);
}

#[tokio::test]
async fn responding_twice_to_the_same_request_fails() {
    let (_server, addr, _dir) = spawn_server().await;
    let _ss = register_storage_server(addr, "ss1", 9100).await;
    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;

    let mut create_msg = Message::request(MessageType::Create);
    create_msg.filename = "doc.txt".into();
    roundtrip(&mut alice, create_msg).await;

    let mut request_msg = Message::request(MessageType::RequestAccess);
    request_msg.filename = "doc.txt".into();
    request_msg.flags = 1;
    let reply = roundtrip(&mut bob, request_msg).await;
    let request_id = u64::from_le_bytes(reply.data.try_into().unwrap());

    let mut respond_msg = Message::request(MessageType::RespondRequest);
    respond_msg.filename = "doc.txt".into();
    respond_msg.request_id = request_id;
    respond_msg.flags = 1;
    roundtrip(&mut alice, respond_msg.clone()).await;

    let reply = roundtrip(&mut alice, respond_msg).await;
    assert_eq!(reply.error_code, ErrorCode::RequestNotFound);
}

#[tokio::test]
async fn creating_the_same_folder_twice_reports_folder_exists() {
    let (_server, addr, _dir) = spawn_server().await;
    let mut alice = login(addr, "alice").await;

    let mut create_msg = Message::request(MessageType::CreateFolder);
    create_msg.folder = "projects/alpha".into();
    let reply = roundtrip(&mut alice, create_msg.clone()).await;
    assert_eq!(reply.error_code, ErrorCode::Success);

    let reply = roundtrip(&mut alice, create_msg).await;
    assert_eq!(reply.error_code, ErrorCode::FolderExists);
}

#[tokio::test]
async fn registry_survives_a_save_and_load_cycle() {
    let (server, addr, dir) = spawn_server().await;
    let _ss = register_storage_server(addr, "ss1", 9100).await;
    let mut alice = login(addr, "alice").await;

    let mut create_msg = Message::request(MessageType::Create);
    create_msg.filename = "persisted.txt".into();
    roundtrip(&mut alice, create_msg).await;

    let path = dir.path().join("registry.dat");
    naming_server::persistence::save(&server.store, &path).unwrap();
    let reloaded = naming_server::persistence::load(&path).unwrap();
    assert!(reloaded.file_exists("persisted.txt"));
}
