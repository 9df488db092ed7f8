//! The read-path fallback chain (§4.4): when a file's primary storage
//! server is unreachable, the naming server tries its local cache, then a
//! backup copy, then failover to another active storage server, before
//! finally giving up with `SS_UNAVAILABLE`.

use std::path::PathBuf;

use crate::config::Config;
use crate::ss::SsRegistry;

/// Where a READ should be satisfied from, in the order the chain tried them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// Served directly from the primary storage server --- no fallback needed.
    Primary,
    /// A cached copy on the naming server's own disk.
    Cache(PathBuf),
    /// A backup copy of the primary SS's data.
    Backup(PathBuf),
    /// Proxy the read to a different, still-active storage server.
    Failover(String),
    /// No source could serve the file.
    Unavailable,
}

/// Resolves the fallback chain for a file whose primary storage server is
/// `primary_ss_id` and whose health is `primary_active`.
pub async fn plan_read(
    config: &Config,
    registry: &SsRegistry,
    primary_ss_id: &str,
    primary_active: bool,
    filename: &str,
) -> ReadPlan {
    if primary_active {
        return ReadPlan::Primary;
    }

    let cache_path = config.cache_dir().join(filename);
    if tokio::fs::metadata(&cache_path).await.is_ok() {
        return ReadPlan::Cache(cache_path);
    }

    let backup_path = config.backups_dir().join(primary_ss_id).join(filename);
    if tokio::fs::metadata(&backup_path).await.is_ok() {
        return ReadPlan::Backup(backup_path);
    }

    match registry.pick_failover(primary_ss_id) {
        Some(other_id) => ReadPlan::Failover(other_id),
        None => ReadPlan::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn test_config(data_dir: PathBuf) -> Config {
        Config {
            port: 0,
            data_dir,
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 60,
            max_clients: 10,
        }
    }

    #[tokio::test]
    async fn active_primary_needs_no_fallback() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = SsRegistry::new();
        let plan = plan_read(&config, &registry, "ss1", true, "notes.txt").await;
        assert_eq!(plan, ReadPlan::Primary);
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_present() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        tokio::fs::create_dir_all(config.cache_dir()).await.unwrap();
        tokio::fs::write(config.cache_dir().join("notes.txt"), b"cached").await.unwrap();
        let registry = SsRegistry::new();
        let plan = plan_read(&config, &registry, "ss1", false, "notes.txt").await;
        assert_eq!(plan, ReadPlan::Cache(config.cache_dir().join("notes.txt")));
    }

    #[tokio::test]
    async fn falls_back_to_backup_when_no_cache() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let backup_dir = config.backups_dir().join("ss1");
        tokio::fs::create_dir_all(&backup_dir).await.unwrap();
        tokio::fs::write(backup_dir.join("notes.txt"), b"backup").await.unwrap();
        let registry = SsRegistry::new();
        let plan = plan_read(&config, &registry, "ss1", false, "notes.txt").await;
        assert_eq!(plan, ReadPlan::Backup(backup_dir.join("notes.txt")));
    }

    #[tokio::test]
    async fn unavailable_when_nothing_can_serve_it() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = SsRegistry::new();
        let plan = plan_read(&config, &registry, "ss1", false, "notes.txt").await;
        assert_eq!(plan, ReadPlan::Unavailable);
    }
}
