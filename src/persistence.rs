//! Registry persistence (§4.8, §6): the file table is saved to a flat text
//! file on graceful shutdown and reloaded at startup. Folders, checkpoints,
//! access requests, sessions, and the search cache are deliberately not
//! persisted --- they are reconstructed or simply re-earned at runtime.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{NsError, Result};
use crate::metadata::file::{AclEntry, FileRecord};
use crate::metadata::Store;

const HEADER: &str = "REGISTRY_V1";

fn to_unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Writes every file record in `store` to `path` in the `REGISTRY_V1`
/// format. ACL entries follow their file's `FILE:` line, and each file
/// block is terminated by a bare `END` line.
pub fn save(store: &Store, path: &Path) -> Result<()> {
    let files = store.list_files("", true);

    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(&files.len().to_string());
    out.push('\n');

    for file in &files {
        out.push_str(&format!(
            "FILE:{}:{}:{}:{}:{}:{}:{}:{}:{}\n",
            file.name,
            file.owner,
            file.storage_server_id,
            to_unix_secs(file.created_at),
            to_unix_secs(file.last_modified),
            to_unix_secs(file.last_accessed),
            file.size,
            file.word_count,
            file.char_count,
        ));
        for acl in &file.acl {
            out.push_str(&format!("ACL:{}:{}:{}\n", acl.username, acl.can_read as u8, acl.can_write as u8));
        }
        out.push_str("END\n");
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("dat.tmp");
    let mut tmp = std::fs::File::create(&tmp_path)?;
    tmp.write_all(out.as_bytes())?;
    tmp.sync_all()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads a previously saved registry into a fresh [`Store`]. Returns an
/// empty store if `path` does not exist (first startup, §4.8).
pub fn load(path: &Path) -> Result<Store> {
    let store = Store::new();
    if !path.exists() {
        return Ok(store);
    }

    let file = std::fs::File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next()
        .ok_or_else(|| NsError::Persistence("registry file is empty".into()))??;
    if header != HEADER {
        return Err(NsError::Persistence(format!("unrecognized registry header: {header}")));
    }

    let count: usize = lines
        .next()
        .ok_or_else(|| NsError::Persistence("registry missing file count".into()))??
        .parse()
        .map_err(|_| NsError::Persistence("registry file count is not a number".into()))?;

    for _ in 0..count {
        let file_line = lines
            .next()
            .ok_or_else(|| NsError::Persistence("registry truncated before FILE line".into()))??;
        let fields: Vec<&str> = file_line.splitn(2, ':').collect();
        if fields.first() != Some(&"FILE") {
            return Err(NsError::Persistence(format!("expected FILE line, got: {file_line}")));
        }
        let parts: Vec<&str> = fields[1].split(':').collect();
        if parts.len() != 9 {
            return Err(NsError::Persistence(format!("malformed FILE line: {file_line}")));
        }
        let mut record = FileRecord::new(parts[0], parts[1], parts[2], "");
        record.created_at = from_unix_secs(parse_field(parts[3])?);
        record.last_modified = from_unix_secs(parse_field(parts[4])?);
        record.last_accessed = from_unix_secs(parse_field(parts[5])?);
        record.size = parse_field(parts[6])?;
        record.word_count = parse_field(parts[7])?;
        record.char_count = parse_field(parts[8])?;

        loop {
            let line = lines
                .next()
                .ok_or_else(|| NsError::Persistence("registry truncated inside file block".into()))??;
            if line == "END" {
                break;
            }
            let acl_fields: Vec<&str> = line.splitn(2, ':').collect();
            if acl_fields.first() != Some(&"ACL") {
                return Err(NsError::Persistence(format!("expected ACL or END line, got: {line}")));
            }
            let acl_parts: Vec<&str> = acl_fields[1].split(':').collect();
            if acl_parts.len() != 3 {
                return Err(NsError::Persistence(format!("malformed ACL line: {line}")));
            }
            record.acl.push(AclEntry {
                username: acl_parts[0].to_string(),
                can_read: acl_parts[1] == "1",
                can_write: acl_parts[2] == "1",
            });
        }

        store
            .insert_file(record)
            .map_err(|_| NsError::Persistence("duplicate file name in registry".into()))?;
    }

    Ok(store)
}

fn parse_field<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse().map_err(|_| NsError::Persistence(format!("could not parse field: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips_files_and_acls() {
        let store = Store::new();
        let mut record = FileRecord::new("notes.txt", "alice", "ss1", "");
        record.refresh_stats(128, 20, 700);
        record.upsert_acl("bob", true, false);
        store.insert_file(record).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.dat");
        save(&store, &path).unwrap();

        let loaded = load(&path).unwrap();
        let reloaded = loaded.get_file("notes.txt").unwrap();
        assert_eq!(reloaded.owner, "alice");
        assert_eq!(reloaded.storage_server_id, "ss1");
        assert_eq!(reloaded.size, 128);
        assert_eq!(reloaded.acl.len(), 1);
        assert_eq!(reloaded.acl[0].username, "bob");
        assert!(reloaded.acl[0].can_read);
        assert!(!reloaded.acl[0].can_write);
    }

    #[test]
    fn load_missing_file_returns_empty_store() {
        let dir = tempdir().unwrap();
        let store = load(&dir.path().join("does-not-exist.dat")).unwrap();
        assert!(store.list_files("", true).is_empty());
    }
}
