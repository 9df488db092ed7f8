//! The in-memory metadata store: files, folders, and the search cache (§3,
//! §4.2). User and session state live in [`crate::session`] --- a distinct
//! lock domain per §5.

pub mod access_request;
pub mod file;
pub mod folder;
pub mod search;

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use moka::sync::Cache;

use access_request::{AccessRequest, AccessType, RequestStatus};
use file::FileRecord;
use folder::FolderRecord;

/// Domain-level outcome of a [`Store`] operation, independent of the wire
/// [`crate::wire::ErrorCode`] set. The dispatcher maps these to wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    FileNotFound,
    FileExists,
    FolderNotFound,
    FolderExists,
    CheckpointNotFound,
    CheckpointExists,
    RequestNotFound,
    DuplicatePendingRequest,
    PermissionDenied,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Bound on the number of distinct queries the search memo retains (§4.7).
const SEARCH_CACHE_CAPACITY: u64 = 1024;

/// The metadata store. Each collection is its own lock, matching the five
/// domains in §5 (file-table, folder-table, the request-id counter, and the
/// search cache; users/sessions live in [`crate::session::SessionManager`]).
pub struct Store {
    files: RwLock<HashMap<String, FileRecord>>,
    folders: RwLock<HashMap<String, FolderRecord>>,
    next_request_id: Mutex<u64>,
    search_cache: Cache<String, Vec<String>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            files: RwLock::new(HashMap::new()),
            folders: RwLock::new(HashMap::new()),
            next_request_id: Mutex::new(1),
            search_cache: Cache::builder().max_capacity(SEARCH_CACHE_CAPACITY).build(),
        }
    }

    // -- files -----------------------------------------------------------

    pub fn insert_file(&self, record: FileRecord) -> StoreResult<()> {
        let mut files = self.files.write().unwrap();
        if files.contains_key(&record.name) {
            return Err(StoreError::FileExists);
        }
        files.insert(record.name.clone(), record);
        drop(files);
        self.invalidate_search_cache();
        Ok(())
    }

    /// Inserts a file discovered via SS registration if absent, owned by
    /// `"system"` (§4.3, §9 design note on the sentinel owner). Returns
    /// `true` if a new record was created.
    pub fn ensure_system_file(&self, name: &str, ss_id: &str) -> bool {
        let mut files = self.files.write().unwrap();
        if let Some(existing) = files.get_mut(name) {
            existing.storage_server_id = ss_id.to_string();
            false
        } else {
            files.insert(name.to_string(), FileRecord::new(name, "system", ss_id, ""));
            true
        }
    }

    pub fn remove_file(&self, name: &str) -> StoreResult<FileRecord> {
        let mut files = self.files.write().unwrap();
        let record = files.remove(name).ok_or(StoreError::FileNotFound)?;
        drop(files);
        self.invalidate_search_cache();
        Ok(record)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.files.read().unwrap().contains_key(name)
    }

    pub fn get_file(&self, name: &str) -> Option<FileRecord> {
        self.files.read().unwrap().get(name).cloned()
    }

    pub fn with_file<T>(&self, name: &str, f: impl FnOnce(&FileRecord) -> T) -> StoreResult<T> {
        let files = self.files.read().unwrap();
        let record = files.get(name).ok_or(StoreError::FileNotFound)?;
        Ok(f(record))
    }

    pub fn with_file_mut<T>(&self, name: &str, f: impl FnOnce(&mut FileRecord) -> T) -> StoreResult<T> {
        let mut files = self.files.write().unwrap();
        let record = files.get_mut(name).ok_or(StoreError::FileNotFound)?;
        Ok(f(record))
    }

    pub fn list_files(&self, caller: &str, all: bool) -> Vec<FileRecord> {
        self.files
            .read()
            .unwrap()
            .values()
            .filter(|f| all || f.can_read(caller))
            .cloned()
            .collect()
    }

    pub fn files_in_folder(&self, folder: &str) -> Vec<FileRecord> {
        self.files.read().unwrap().values().filter(|f| f.folder == folder).cloned().collect()
    }

    /// Re-asserts `storage_server_id` on a file rediscovered through SS
    /// reconnect registration, preserving ACLs and every other field (§4.3,
    /// scenario S4).
    pub fn reassert_storage_server(&self, name: &str, ss_id: &str) {
        if let Some(record) = self.files.write().unwrap().get_mut(name) {
            record.storage_server_id = ss_id.to_string();
        }
    }

    // -- folders -----------------------------------------------------------

    /// Creates `path` and any missing ancestors under `owner` (§3). Returns
    /// `FolderExists` only if the leaf itself already exists.
    pub fn create_folder(&self, path: &str, owner: &str) -> StoreResult<()> {
        let chain = folder::ancestor_chain(path);
        if chain.is_empty() {
            return Err(StoreError::FolderExists);
        }
        let mut folders = self.folders.write().unwrap();
        if folders.contains_key(path) {
            return Err(StoreError::FolderExists);
        }
        for ancestor in chain {
            folders.entry(ancestor.clone()).or_insert_with(|| FolderRecord::new(ancestor, owner));
        }
        Ok(())
    }

    pub fn folder_exists(&self, path: &str) -> bool {
        path.is_empty() || self.folders.read().unwrap().contains_key(path)
    }

    // -- access requests ---------------------------------------------------

    /// Appends a new `Pending` request, enforcing invariant #5 (at most one
    /// pending request per `(file, requester)`). Lock order is file-table
    /// then the request-id counter (§5).
    pub fn add_access_request(
        &self,
        filename: &str,
        requester: &str,
        access_type: AccessType,
    ) -> StoreResult<u64> {
        let mut files = self.files.write().unwrap();
        let record = files.get_mut(filename).ok_or(StoreError::FileNotFound)?;
        if record.requests.iter().any(|r| r.requester == requester && r.status == RequestStatus::Pending) {
            return Err(StoreError::DuplicatePendingRequest);
        }
        let id = {
            let mut next = self.next_request_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        record.requests.push(AccessRequest {
            id,
            requester: requester.to_string(),
            access_type,
            requested_at: SystemTime::now(),
            status: RequestStatus::Pending,
        });
        Ok(id)
    }

    /// Transitions a `Pending` request to `Approved`/`Denied`; on approval,
    /// upserts the derived ACL entry (§4.5). Returns the request's
    /// requester and access type so the caller can log/respond.
    pub fn respond_request(
        &self,
        filename: &str,
        request_id: u64,
        approve: bool,
    ) -> StoreResult<(String, AccessType)> {
        let mut files = self.files.write().unwrap();
        let record = files.get_mut(filename).ok_or(StoreError::FileNotFound)?;
        let request = record
            .requests
            .iter()
            .find(|r| r.id == request_id && r.status == RequestStatus::Pending)
            .cloned()
            .ok_or(StoreError::RequestNotFound)?;

        let status = if approve { RequestStatus::Approved } else { RequestStatus::Denied };
        if let Some(r) = record.requests.iter_mut().find(|r| r.id == request_id) {
            r.status = status;
        }
        if approve {
            let (read, write) = request.access_type.derived_rw();
            record.upsert_acl(&request.requester, read, write);
        }
        Ok((request.requester, request.access_type))
    }

    pub fn pending_requests(&self, filename: &str) -> StoreResult<Vec<AccessRequest>> {
        self.with_file(filename, |f| {
            f.requests.iter().filter(|r| r.status == RequestStatus::Pending).cloned().collect()
        })
    }

    // -- search cache --------------------------------------------------------

    /// Returns cached results for `query` visible to `caller`, computing and
    /// memoizing them on a miss (§4.7). `"system"`-owned files never match --- /// they are readable by nobody until an owner override (§9).
    pub fn search(&self, query: &str, caller: &str) -> Vec<String> {
        let cache_key = format!("{caller}\u{0}{query}");
        if let Some(hit) = self.search_cache.get(&cache_key) {
            return hit;
        }
        let results: Vec<String> = self
            .files
            .read()
            .unwrap()
            .values()
            .filter(|f| f.owner != "system" && f.can_read(caller))
            .filter(|f| search::matches(query, &f.name))
            .map(|f| f.name.clone())
            .collect();
        self.search_cache.insert(cache_key, results.clone());
        results
    }

    /// Invalidates the entire search memo (property #8: any CREATE/DELETE
    /// invalidates every prior cached result).
    pub fn invalidate_search_cache(&self) {
        self.search_cache.invalidate_all();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_pending_request_rejected() {
        let store = Store::new();
        store.insert_file(FileRecord::new("plan.doc", "alice", "ss1", "")).unwrap();
        store.add_access_request("plan.doc", "bob", AccessType::ReadWrite).unwrap();
        let err = store.add_access_request("plan.doc", "bob", AccessType::Read).unwrap_err();
        assert_eq!(err, StoreError::DuplicatePendingRequest);
    }

    #[test]
    fn approve_derives_acl_from_original_access_type() {
        let store = Store::new();
        store.insert_file(FileRecord::new("plan.doc", "alice", "ss1", "")).unwrap();
        let id = store.add_access_request("plan.doc", "bob", AccessType::ReadWrite).unwrap();
        store.respond_request("plan.doc", id, true).unwrap();
        let can_write = store.with_file("plan.doc", |f| f.can_write("bob")).unwrap();
        assert!(can_write);
    }

    #[test]
    fn responding_twice_to_terminal_request_fails() {
        let store = Store::new();
        store.insert_file(FileRecord::new("plan.doc", "alice", "ss1", "")).unwrap();
        let id = store.add_access_request("plan.doc", "bob", AccessType::Read).unwrap();
        store.respond_request("plan.doc", id, true).unwrap();
        let err = store.respond_request("plan.doc", id, true).unwrap_err();
        assert_eq!(err, StoreError::RequestNotFound);
    }

    #[test]
    fn create_then_recreate_folder_reports_exists() {
        let store = Store::new();
        store.create_folder("a/b/c", "alice").unwrap();
        assert!(store.folder_exists("a"));
        assert!(store.folder_exists("a/b"));
        assert!(store.folder_exists("a/b/c"));
        assert_eq!(store.create_folder("a/b/c", "alice").unwrap_err(), StoreError::FolderExists);
    }

    #[test]
    fn search_cache_invalidated_by_create() {
        let store = Store::new();
        store.insert_file(FileRecord::new("report.txt", "alice", "ss1", "")).unwrap();
        assert_eq!(store.search("report", "alice"), vec!["report.txt".to_string()]);
        store.insert_file(FileRecord::new("report2.txt", "alice", "ss1", "")).unwrap();
        let mut results = store.search("report", "alice");
        results.sort();
        assert_eq!(results, vec!["report.txt".to_string(), "report2.txt".to_string()]);
    }

    #[test]
    fn system_owned_files_are_hidden_from_search() {
        let store = Store::new();
        assert!(store.ensure_system_file("orphan.txt", "ss1"));
        assert!(store.search("orphan", "alice").is_empty());
    }
}
