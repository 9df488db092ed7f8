//! [`FileRecord`] --- authoritative per-file metadata (§3).

use std::time::SystemTime;

use super::access_request::AccessRequest;

/// One non-owner entry in a file's access-control list. The owner is never
/// represented here --- ownership implies full access (invariant #1).
#[derive(Debug, Clone)]
pub struct AclEntry {
    pub username: String,
    pub can_read: bool,
    pub can_write: bool,
}

/// A named snapshot of a file's bytes, taken on the owning storage server.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub tag: String,
    pub creator: String,
    pub created_at: SystemTime,
    pub size: u64,
}

/// Authoritative per-file metadata record (§3).
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub owner: String,
    pub storage_server_id: String,
    pub folder: String,
    pub created_at: SystemTime,
    pub last_modified: SystemTime,
    pub last_accessed: SystemTime,
    pub size: u64,
    pub word_count: u64,
    pub char_count: u64,
    pub acl: Vec<AclEntry>,
    pub checkpoints: Vec<Checkpoint>,
    pub requests: Vec<AccessRequest>,
}

impl FileRecord {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        storage_server_id: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        let now = SystemTime::now();
        FileRecord {
            name: name.into(),
            owner: owner.into(),
            storage_server_id: storage_server_id.into(),
            folder: folder.into(),
            created_at: now,
            last_modified: now,
            last_accessed: now,
            size: 0,
            word_count: 0,
            char_count: 0,
            acl: Vec::new(),
            checkpoints: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn can_read(&self, user: &str) -> bool {
        user == self.owner || self.acl.iter().any(|e| e.username == user && e.can_read)
    }

    pub fn can_write(&self, user: &str) -> bool {
        user == self.owner || self.acl.iter().any(|e| e.username == user && e.can_write)
    }

    /// Upserts an ACL entry for `user`. A no-op for the owner (invariant #1).
    /// `write` always implies `read` (invariant #3, testable property #3).
    pub fn upsert_acl(&mut self, user: &str, read: bool, write: bool) {
        if user == self.owner {
            return;
        }
        let read = read || write;
        match self.acl.iter_mut().find(|e| e.username == user) {
            Some(entry) => {
                entry.can_read = read;
                entry.can_write = write;
            }
            None => self.acl.push(AclEntry { username: user.to_string(), can_read: read, can_write: write }),
        }
    }

    pub fn remove_acl(&mut self, user: &str) {
        self.acl.retain(|e| e.username != user);
    }

    pub fn has_checkpoint(&self, tag: &str) -> bool {
        self.checkpoints.iter().any(|c| c.tag == tag)
    }

    pub fn add_checkpoint(&mut self, tag: impl Into<String>, creator: impl Into<String>, size: u64) {
        self.checkpoints.push(Checkpoint {
            tag: tag.into(),
            creator: creator.into(),
            created_at: SystemTime::now(),
            size,
        });
    }

    pub fn refresh_stats(&mut self, size: u64, word_count: u64, char_count: u64) {
        self.size = size;
        self.word_count = word_count;
        self.char_count = char_count;
    }

    pub fn touch_accessed(&mut self) {
        self.last_accessed = SystemTime::now();
    }

    pub fn touch_modified(&mut self) {
        self.last_modified = SystemTime::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_never_enters_acl() {
        let mut f = FileRecord::new("a.txt", "alice", "ss1", "");
        f.upsert_acl("alice", true, true);
        assert!(f.acl.is_empty());
    }

    #[test]
    fn write_implies_read() {
        let mut f = FileRecord::new("a.txt", "alice", "ss1", "");
        f.upsert_acl("bob", false, true);
        assert!(f.can_read("bob"));
        assert!(f.can_write("bob"));
    }

    #[test]
    fn upsert_is_idempotent_per_user() {
        let mut f = FileRecord::new("a.txt", "alice", "ss1", "");
        f.upsert_acl("bob", true, false);
        f.upsert_acl("bob", true, true);
        assert_eq!(f.acl.len(), 1);
        assert!(f.acl[0].can_write);
    }
}
