//! Per-operation handlers. Each function takes the caller's username and
//! the inbound [`Message`] and returns the reply to send back (§4.1).

use tracing::{debug, warn};

use crate::metadata::access_request::AccessType;
use crate::metadata::file::FileRecord;
use crate::metadata::StoreError;
use crate::ss::SsState;
use crate::wire::{ErrorCode, Message, MessageType};

use super::NamingServer;

fn err(msg_type: MessageType, code: ErrorCode, text: impl Into<String>) -> Message {
    Message::error(msg_type, code, text)
}

fn store_err_to_wire(msg_type: MessageType, e: StoreError) -> Message {
    let code = match e {
        StoreError::FileNotFound => ErrorCode::FileNotFound,
        StoreError::FileExists => ErrorCode::FileExists,
        StoreError::FolderNotFound => ErrorCode::FolderNotFound,
        StoreError::FolderExists => ErrorCode::FolderExists,
        StoreError::CheckpointNotFound | StoreError::CheckpointExists => ErrorCode::CheckpointNotFound,
        StoreError::RequestNotFound => ErrorCode::RequestNotFound,
        StoreError::DuplicatePendingRequest => ErrorCode::InvalidRequest,
        StoreError::PermissionDenied => ErrorCode::PermissionDenied,
    };
    err(msg_type, code, format!("{e:?}"))
}

/// Relays `request` to `ss_id`'s control channel and returns its reply
/// verbatim. A missing channel or a transport error both come back as
/// `SS_UNAVAILABLE` --- there is no third outcome a caller needs to tell apart.
async fn proxy_to_ss(server: &NamingServer, ss_id: &str, request: Message) -> Result<Message, Message> {
    let msg_type = request.msg_type;
    let Some(channel) = server.ss_registry.channel(ss_id) else {
        return Err(err(msg_type, ErrorCode::SsUnavailable, "storage server has no control channel"));
    };
    channel
        .send_recv(&request)
        .await
        .map_err(|e| err(msg_type, ErrorCode::SsUnavailable, e.to_string()))
}

/// Best-effort fire-and-forget notification (§5: "replication to other SSes
/// is fire-and-forget") for operations whose error column never lists
/// `SS_UNAVAILABLE` --- the metadata mutation has already happened and a client
/// never learns whether the SS-side echo landed.
async fn notify_ss_best_effort(server: &NamingServer, ss_id: &str, request: Message) {
    let msg_type = request.msg_type;
    match proxy_to_ss(server, ss_id, request).await {
        Ok(reply) if !reply.error_code.is_ok() => {
            warn!(?msg_type, ss_id, error_code = ?reply.error_code, "storage server rejected best-effort notification");
        }
        Err(_) => {
            warn!(?msg_type, ss_id, "best-effort storage server notification failed");
        }
        Ok(_) => {}
    }
}

fn non_empty_utf8(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(str::to_string).filter(|s| !s.is_empty())
}

/// `CREATE`: picks a storage server (the id named in `data`, or else the
/// first active one), forwards the create to it over its control channel,
/// and only records the [`FileRecord`] once the SS confirms (§4.1).
pub async fn create(server: &NamingServer, username: &str, msg: &Message) -> Message {
    if !msg.folder.is_empty() && !server.store.folder_exists(&msg.folder) {
        return err(MessageType::Create, ErrorCode::FolderNotFound, "folder does not exist");
    }
    if server.store.file_exists(&msg.filename) {
        return err(MessageType::Create, ErrorCode::FileExists, "file already exists");
    }

    let requested = non_empty_utf8(&msg.data);
    let ss_id = match requested {
        Some(id) if server.ss_registry.get(&id).map(|s| s.state == SsState::Active).unwrap_or(false) => id,
        Some(_) => {
            return err(MessageType::Create, ErrorCode::SsUnavailable, "requested storage server is not connected")
        }
        None => match server.ss_registry.active_ids().into_iter().next() {
            Some(id) => id,
            None => return err(MessageType::Create, ErrorCode::SsUnavailable, "no active storage server"),
        },
    };

    let mut forward = Message::request(MessageType::Create);
    forward.filename = msg.filename.clone();
    forward.username = username.to_string();
    forward.folder = msg.folder.clone();
    let reply = match proxy_to_ss(server, &ss_id, forward).await {
        Ok(r) => r,
        Err(e) => return e,
    };
    if !reply.error_code.is_ok() {
        return err(MessageType::Create, reply.error_code, "storage server rejected create");
    }

    let record = FileRecord::new(&msg.filename, username, &ss_id, &msg.folder);
    match server.store.insert_file(record) {
        Ok(()) => match server.ss_registry.get(&ss_id) {
            Some(ss) => Message::ss_info(MessageType::Create, ss.ip, ss.client_port),
            None => err(MessageType::Create, ErrorCode::SsUnavailable, "storage server vanished"),
        },
        Err(e) => store_err_to_wire(MessageType::Create, e),
    }
}

/// `READ`/`STREAM`: resolves the owning storage server and points the
/// caller at it, falling back per §4.4 when the primary is unreachable.
pub async fn read(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let record = match server.store.with_file(&msg.filename, |f| f.clone()) {
        Ok(r) => r,
        Err(e) => return store_err_to_wire(msg.msg_type, e),
    };
    if !record.can_read(username) {
        return err(msg.msg_type, ErrorCode::PermissionDenied, "no read access");
    }
    let _ = server.store.with_file_mut(&msg.filename, |f| f.touch_accessed());

    let ss = server.ss_registry.get(&record.storage_server_id);
    let primary_active = ss.as_ref().map(|s| s.state == SsState::Active).unwrap_or(false);

    use crate::fallback::{plan_read, ReadPlan};
    match plan_read(&server.config, &server.ss_registry, &record.storage_server_id, primary_active, &msg.filename).await
    {
        ReadPlan::Primary => {
            let ss = ss.expect("primary_active implies ss exists");
            Message::ss_info(msg.msg_type, ss.ip, ss.client_port)
        }
        ReadPlan::Cache(path) | ReadPlan::Backup(path) => match tokio::fs::read(&path).await {
            Ok(data) => Message::success(msg.msg_type, data),
            Err(e) => err(msg.msg_type, ErrorCode::ServerError, e.to_string()),
        },
        ReadPlan::Failover(other_id) => {
            let _ = server.store.with_file_mut(&msg.filename, |f| f.storage_server_id = other_id.clone());
            match server.ss_registry.get(&other_id) {
                Some(other) => Message::ss_info(msg.msg_type, other.ip, other.client_port),
                None => err(msg.msg_type, ErrorCode::SsUnavailable, "failover target vanished"),
            }
        }
        ReadPlan::Unavailable => err(msg.msg_type, ErrorCode::SsUnavailable, "no source can serve this file"),
    }
}

/// `WRITE`: like `CREATE`'s SS hand-off, but against an existing file the
/// caller has write access to. `UNDO` reuses this path with a flag the
/// storage server interprets (the naming server only gates access).
pub async fn write(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let record = match server.store.with_file(&msg.filename, |f| f.clone()) {
        Ok(r) => r,
        Err(e) => return store_err_to_wire(msg.msg_type, e),
    };
    if !record.can_write(username) {
        return err(msg.msg_type, ErrorCode::PermissionDenied, "no write access");
    }
    let _ = server.store.with_file_mut(&msg.filename, |f| f.touch_modified());
    match server.ss_registry.get(&record.storage_server_id) {
        Some(ss) if ss.state == SsState::Active => Message::ss_info(msg.msg_type, ss.ip, ss.client_port),
        _ => err(msg.msg_type, ErrorCode::SsUnavailable, "primary storage server is down"),
    }
}

/// `DELETE`: owner-only (§4.1 invariant: ACL grants never include delete).
/// The naming server only drops the [`FileRecord`] once the owning storage
/// server confirms the bytes are gone.
pub async fn delete(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let record = match server.store.with_file(&msg.filename, |f| f.clone()) {
        Ok(r) => r,
        Err(e) => return store_err_to_wire(MessageType::Delete, e),
    };
    if record.owner != username {
        return err(MessageType::Delete, ErrorCode::PermissionDenied, "only the owner may delete");
    }
    match server.ss_registry.get(&record.storage_server_id) {
        Some(ss) if ss.state == SsState::Active => {}
        _ => return err(MessageType::Delete, ErrorCode::SsUnavailable, "owning storage server is down"),
    }

    let mut forward = Message::request(MessageType::Delete);
    forward.filename = msg.filename.clone();
    let reply = match proxy_to_ss(server, &record.storage_server_id, forward).await {
        Ok(r) => r,
        Err(e) => return e,
    };
    if !reply.error_code.is_ok() {
        return err(MessageType::Delete, reply.error_code, "storage server rejected delete");
    }

    match server.store.remove_file(&msg.filename) {
        Ok(_) => Message::success(MessageType::Delete, Vec::new()),
        Err(e) => store_err_to_wire(MessageType::Delete, e),
    }
}

fn parse_stat_triple(data: &[u8]) -> Option<(u64, u64, u64)> {
    let text = std::str::from_utf8(data).ok()?;
    let mut parts = text.splitn(3, ':');
    let size = parts.next()?.parse().ok()?;
    let words = parts.next()?.parse().ok()?;
    let chars = parts.next()?.parse().ok()?;
    Some((size, words, chars))
}

fn compute_stats(bytes: &[u8]) -> (u64, u64, u64) {
    let text = String::from_utf8_lossy(bytes);
    (bytes.len() as u64, text.split_whitespace().count() as u64, text.chars().count() as u64)
}

/// `INFO`: returns the encoded stat line (§4.1, §6). If the owning storage
/// server is active the stats are refreshed from it first; otherwise they
/// are recomputed from whatever cache/backup copy the fallback chain finds.
pub async fn info(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let record = match server.store.with_file(&msg.filename, |f| f.clone()) {
        Ok(r) => r,
        Err(e) => return store_err_to_wire(MessageType::Info, e),
    };
    if !record.can_read(username) {
        return err(MessageType::Info, ErrorCode::PermissionDenied, "no read access");
    }

    let ss = server.ss_registry.get(&record.storage_server_id);
    let primary_active = ss.as_ref().map(|s| s.state == SsState::Active).unwrap_or(false);

    use crate::fallback::{plan_read, ReadPlan};
    let plan = plan_read(&server.config, &server.ss_registry, &record.storage_server_id, primary_active, &msg.filename)
        .await;
    match plan {
        ReadPlan::Primary => {
            let mut forward = Message::request(MessageType::Info);
            forward.filename = msg.filename.clone();
            if let Ok(reply) = proxy_to_ss(server, &record.storage_server_id, forward).await {
                if reply.error_code.is_ok() {
                    if let Some((size, words, chars)) = parse_stat_triple(&reply.data) {
                        let _ = server.store.with_file_mut(&msg.filename, |f| f.refresh_stats(size, words, chars));
                    }
                }
            }
        }
        ReadPlan::Cache(path) | ReadPlan::Backup(path) => {
            if let Ok(bytes) = tokio::fs::read(&path).await {
                let (size, words, chars) = compute_stats(&bytes);
                let _ = server.store.with_file_mut(&msg.filename, |f| f.refresh_stats(size, words, chars));
            }
        }
        ReadPlan::Failover(_) | ReadPlan::Unavailable => {}
    }

    let record = server.store.with_file(&msg.filename, |f| f.clone()).unwrap_or(record);
    let line = format!(
        "{}:{}:{}:{}:{}",
        record.owner, record.size, record.word_count, record.char_count, record.storage_server_id
    );
    Message::success(MessageType::Info, line.into_bytes())
}

/// `VIEW`: lists every file the caller can read, or every file in the
/// namespace if `flags & 1` is set (§4.1).
pub async fn view(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let all = msg.flags & 1 != 0;
    let names: Vec<String> = server.store.list_files(username, all).into_iter().map(|f| f.name).collect();
    Message::success(MessageType::View, names.join("\n").into_bytes())
}

/// `LIST_SS`: every registered storage server and its state.
pub async fn list_ss(server: &NamingServer, _username: &str, _msg: &Message) -> Message {
    let lines: Vec<String> = server
        .ss_registry
        .list()
        .into_iter()
        .map(|s| format!("{}:{}:{:?}", s.id, s.ip, s.state))
        .collect();
    Message::success(MessageType::ListSs, lines.join("\n").into_bytes())
}

/// `LIST_USERS`: every username ever registered (§4.6).
pub async fn list_users(server: &NamingServer, _username: &str, _msg: &Message) -> Message {
    Message::success(MessageType::ListUsers, server.sessions.list_users().join("\n").into_bytes())
}

/// `SEARCH`: substring or glob match against filenames the caller can read
/// (§4.7, Open Question resolution).
pub async fn search(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let results = server.store.search(&msg.filename, username);
    Message::success(MessageType::Search, results.join("\n").into_bytes())
}

/// `CREATE_FOLDER`: creates the folder and any missing ancestors locally
/// (§3), then best-effort forwards the leaf to one active storage server to
/// mkdir --- the error column names only `FOLDER_EXISTS`, so a forwarding
/// failure here never becomes a client-visible error.
pub async fn create_folder(server: &NamingServer, username: &str, msg: &Message) -> Message {
    match server.store.create_folder(&msg.folder, username) {
        Ok(()) => {
            if let Some(ss_id) = server.ss_registry.active_ids().into_iter().next() {
                let mut forward = Message::request(MessageType::CreateFolder);
                forward.folder = msg.folder.clone();
                notify_ss_best_effort(server, &ss_id, forward).await;
            }
            Message::success(MessageType::CreateFolder, Vec::new())
        }
        Err(e) => store_err_to_wire(MessageType::CreateFolder, e),
    }
}

/// `VIEW_FOLDER`: lists the files directly inside a folder that the caller
/// can read.
pub async fn view_folder(server: &NamingServer, username: &str, msg: &Message) -> Message {
    if !server.store.folder_exists(&msg.folder) {
        return err(MessageType::ViewFolder, ErrorCode::FolderNotFound, "no such folder");
    }
    let names: Vec<String> = server
        .store
        .files_in_folder(&msg.folder)
        .into_iter()
        .filter(|f| f.can_read(username))
        .map(|f| f.name)
        .collect();
    Message::success(MessageType::ViewFolder, names.join("\n").into_bytes())
}

/// `MOVE`: re-files an existing file into a different (existing) folder.
/// The caller must hold write access; moving does not change ownership.
/// The owning SS is told best-effort --- the error column lists no
/// `SS_UNAVAILABLE` for this op.
pub async fn r#move(server: &NamingServer, username: &str, msg: &Message) -> Message {
    if !server.store.folder_exists(&msg.folder) {
        return err(MessageType::Move, ErrorCode::FolderNotFound, "destination folder does not exist");
    }
    let result = server.store.with_file_mut(&msg.filename, |f| {
        if !f.can_write(username) {
            return Err(());
        }
        f.folder = msg.folder.clone();
        f.touch_modified();
        Ok(f.storage_server_id.clone())
    });
    match result {
        Ok(Ok(ss_id)) => {
            let mut forward = Message::request(MessageType::Move);
            forward.filename = msg.filename.clone();
            forward.folder = msg.folder.clone();
            notify_ss_best_effort(server, &ss_id, forward).await;
            Message::success(MessageType::Move, Vec::new())
        }
        Ok(Err(())) => err(MessageType::Move, ErrorCode::PermissionDenied, "no write access"),
        Err(e) => store_err_to_wire(MessageType::Move, e),
    }
}

/// `CHECKPOINT`: owner-or-writer snapshots the file under `checkpoint_tag`.
/// The record is inserted first; the SS-side snapshot is requested
/// best-effort, matching the error column (only `FILE_EXISTS` for a
/// duplicate tag, no `SS_UNAVAILABLE`).
pub async fn checkpoint(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let result = server.store.with_file_mut(&msg.filename, |f| {
        if !f.can_write(username) {
            return Err(ErrorCode::PermissionDenied);
        }
        if f.has_checkpoint(&msg.checkpoint_tag) {
            return Err(ErrorCode::FileExists);
        }
        f.add_checkpoint(msg.checkpoint_tag.clone(), username, f.size);
        Ok(f.storage_server_id.clone())
    });
    match result {
        Ok(Ok(ss_id)) => {
            let mut forward = Message::request(MessageType::Checkpoint);
            forward.filename = msg.filename.clone();
            forward.checkpoint_tag = msg.checkpoint_tag.clone();
            notify_ss_best_effort(server, &ss_id, forward).await;
            Message::success(MessageType::Checkpoint, Vec::new())
        }
        Ok(Err(code)) => err(MessageType::Checkpoint, code, "checkpoint rejected"),
        Err(e) => store_err_to_wire(MessageType::Checkpoint, e),
    }
}

/// `LIST_CHECKPOINTS`: every checkpoint tag recorded for the file.
pub async fn list_checkpoints(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let result = server.store.with_file(&msg.filename, |f| {
        if !f.can_read(username) {
            return Err(ErrorCode::PermissionDenied);
        }
        Ok(f.checkpoints.iter().map(|c| c.tag.clone()).collect::<Vec<_>>())
    });
    match result {
        Ok(Ok(tags)) => Message::success(MessageType::ListCheckpoints, tags.join("\n").into_bytes()),
        Ok(Err(code)) => err(MessageType::ListCheckpoints, code, "permission denied"),
        Err(e) => store_err_to_wire(MessageType::ListCheckpoints, e),
    }
}

/// `VIEW_CHECKPOINT`/`REVERT`: the naming server validates the tag and the
/// caller's access, then proxies the actual retrieval/rollback over the
/// owning SS's control channel and relays its reply verbatim (§4.1) --- unlike
/// `READ`/`WRITE`, these don't hand the client a direct SS endpoint.
pub async fn view_or_revert_checkpoint(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let record = match server.store.with_file(&msg.filename, |f| f.clone()) {
        Ok(r) => r,
        Err(e) => return store_err_to_wire(msg.msg_type, e),
    };
    let allowed = if msg.msg_type == MessageType::Revert { record.can_write(username) } else { record.can_read(username) };
    if !allowed {
        return err(msg.msg_type, ErrorCode::PermissionDenied, "insufficient access");
    }
    if !record.has_checkpoint(&msg.checkpoint_tag) {
        return err(msg.msg_type, ErrorCode::CheckpointNotFound, "no such checkpoint");
    }

    let mut forward = Message::request(msg.msg_type);
    forward.filename = msg.filename.clone();
    forward.checkpoint_tag = msg.checkpoint_tag.clone();
    match proxy_to_ss(server, &record.storage_server_id, forward).await {
        Ok(reply) => reply,
        Err(e) => e,
    }
}

/// `ADD_ACCESS`/`REM_ACCESS`: owner-only ACL edits. `ADD_ACCESS`'s `flags`
/// is a bitmask (`flags & 2` grants write and implies read) --- unlike
/// `REQUEST_ACCESS`'s direct enumeration (§4.5, §6).
pub async fn add_access(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let write = msg.flags & 2 != 0;
    let read = write || msg.flags & 1 != 0;
    let result = server.store.with_file_mut(&msg.filename, |f| {
        if f.owner != username {
            return Err(ErrorCode::PermissionDenied);
        }
        f.upsert_acl(&msg.username, read, write);
        Ok(())
    });
    match result {
        Ok(Ok(())) => Message::success(MessageType::AddAccess, Vec::new()),
        Ok(Err(code)) => err(MessageType::AddAccess, code, "only the owner may grant access"),
        Err(e) => store_err_to_wire(MessageType::AddAccess, e),
    }
}

pub async fn rem_access(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let result = server.store.with_file_mut(&msg.filename, |f| {
        if f.owner != username {
            return Err(ErrorCode::PermissionDenied);
        }
        f.remove_acl(&msg.username);
        Ok(())
    });
    match result {
        Ok(Ok(())) => Message::success(MessageType::RemAccess, Vec::new()),
        Ok(Err(code)) => err(MessageType::RemAccess, code, "only the owner may revoke access"),
        Err(e) => store_err_to_wire(MessageType::RemAccess, e),
    }
}

/// `REQUEST_ACCESS`: a non-owner petitions for read/write/read-write
/// access (§4.5). `flags` is a direct enumeration, not a bitmask.
pub async fn request_access(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let Some(access_type) = AccessType::from_flags(msg.flags) else {
        return err(MessageType::RequestAccess, ErrorCode::InvalidRequest, "flags must be 1, 2, or 3");
    };
    match server.store.add_access_request(&msg.filename, username, access_type) {
        Ok(id) => Message::success(MessageType::RequestAccess, id.to_le_bytes().to_vec()),
        Err(StoreError::DuplicatePendingRequest) => {
            err(MessageType::RequestAccess, ErrorCode::FileExists, "a request is already pending")
        }
        Err(e) => store_err_to_wire(MessageType::RequestAccess, e),
    }
}

/// `VIEW_REQUESTS`: owner-only listing of a file's pending requests.
pub async fn view_requests(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let owner = server.store.with_file(&msg.filename, |f| f.owner.clone());
    match owner {
        Ok(owner) if owner == username => match server.store.pending_requests(&msg.filename) {
            Ok(requests) => {
                let lines: Vec<String> =
                    requests.iter().map(|r| format!("{}:{}:{:?}", r.id, r.requester, r.access_type)).collect();
                Message::success(MessageType::ViewRequests, lines.join("\n").into_bytes())
            }
            Err(e) => store_err_to_wire(MessageType::ViewRequests, e),
        },
        Ok(_) => err(MessageType::ViewRequests, ErrorCode::PermissionDenied, "only the owner may view requests"),
        Err(e) => store_err_to_wire(MessageType::ViewRequests, e),
    }
}

/// `RESPOND_REQUEST`: owner-only approve/deny of a pending request.
/// `flags` here encodes the decision (nonzero = approve), not an access
/// type --- the granted `(read, write)` comes from the request's own stored
/// access type, not from this message (§4.5, resolved S5 ambiguity).
pub async fn respond_request(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let owner = server.store.with_file(&msg.filename, |f| f.owner.clone());
    match owner {
        Ok(owner) if owner == username => {
            match server.store.respond_request(&msg.filename, msg.request_id, msg.flags != 0) {
                Ok(_) => Message::success(MessageType::RespondRequest, Vec::new()),
                Err(e) => store_err_to_wire(MessageType::RespondRequest, e),
            }
        }
        Ok(_) => err(MessageType::RespondRequest, ErrorCode::PermissionDenied, "only the owner may respond"),
        Err(e) => store_err_to_wire(MessageType::RespondRequest, e),
    }
}

/// `EXEC`: fetches the file's content from its owning storage server over a
/// one-shot connection to its client port, writes it to a temp script,
/// runs it under a shell, and returns the captured output (§4.1). Running
/// arbitrary file content as a shell script on the naming server host is
/// an intentional, documented capability (§9), not an oversight.
pub async fn exec(server: &NamingServer, username: &str, msg: &Message) -> Message {
    let record = match server.store.with_file(&msg.filename, |f| f.clone()) {
        Ok(r) => r,
        Err(e) => return store_err_to_wire(MessageType::Exec, e),
    };
    if !record.can_read(username) {
        return err(MessageType::Exec, ErrorCode::PermissionDenied, "no read access");
    }
    let Some(ss) = server.ss_registry.get(&record.storage_server_id) else {
        return err(MessageType::Exec, ErrorCode::ServerError, "owning storage server is unknown");
    };
    if ss.state != SsState::Active {
        return err(MessageType::Exec, ErrorCode::ServerError, "owning storage server is down");
    }

    let content = match fetch_file_content(&ss.ip, ss.client_port, &msg.filename).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, filename = %msg.filename, "EXEC failed to fetch file content");
            return err(MessageType::Exec, ErrorCode::ServerError, e.to_string());
        }
    };

    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => return err(MessageType::Exec, ErrorCode::ServerError, e.to_string()),
    };
    let script_path = scratch.path().join(&msg.filename);
    if let Err(e) = tokio::fs::write(&script_path, &content).await {
        return err(MessageType::Exec, ErrorCode::ServerError, e.to_string());
    }

    debug!(%username, filename = %msg.filename, "running EXEC script");
    match tokio::process::Command::new("sh").arg(&script_path).current_dir(scratch.path()).output().await {
        Ok(output) => {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            Message::success(MessageType::Exec, combined)
        }
        Err(e) => {
            warn!(error = %e, "EXEC script failed to spawn");
            err(MessageType::Exec, ErrorCode::ServerError, e.to_string())
        }
    }
}

/// Opens a one-shot connection to a storage server's client port and reads
/// back a file's content (§4.1's EXEC action). The naming server otherwise
/// never speaks this channel --- bulk I/O is the client's job.
async fn fetch_file_content(ip: &str, port: u32, filename: &str) -> std::io::Result<Vec<u8>> {
    let mut stream = tokio::net::TcpStream::connect((ip, port as u16)).await?;
    let mut request = Message::request(MessageType::Read);
    request.filename = filename.to_string();
    request.write(&mut stream).await.map_err(std::io::Error::other)?;
    let reply = Message::read(&mut stream).await.map_err(std::io::Error::other)?;
    if !reply.error_code.is_ok() {
        return Err(std::io::Error::other(format!("storage server declined read: {:?}", reply.error_code)));
    }
    Ok(reply.data)
}
