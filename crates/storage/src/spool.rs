//! Directory-backed durable work queue.
//!
//! Layout under the spool root:
//!
//! ```text
//! pending/<enqueued-micros>_<item-id>.msg     waiting to be claimed
//! claimed/<enqueued-micros>_<item-id>.msg     leased to a consumer
//! dead/<enqueued-micros>_<item-id>.msg        dead-lettered payload
//! dead/<enqueued-micros>_<item-id>.meta.json  reason + time of dead-lettering
//! ```
//!
//! File contents are the raw payload bytes. Every state change is a rename,
//! and new files are written under a `.tmp` name first, so a crash never
//! leaves a half-written `.msg` behind.
//!
//! One [`SpoolQueue`] owns the spool at a time: `open` takes an exclusive lock
//! on `<root>/.lock` and only then moves everything in `claimed/` back to
//! `pending/`, so a lease never outlives its owner and is never taken from a
//! live one. [`SpoolDeadLetters::open`] needs no lock; dead-letter inspection
//! and requeueing are single renames that are safe next to a running owner.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reconcile::{
    DeadLetter, DeadLetterQueue, NotificationPayload, QueueError, QueueItem, QueueItemId,
    Timestamp, WorkQueue,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::lock::LockFile;

const PENDING_DIR: &str = "pending";
const CLAIMED_DIR: &str = "claimed";
const DEAD_DIR: &str = "dead";
const MESSAGE_EXT: &str = ".msg";
const META_EXT: &str = ".meta.json";
const LOCK_FILE: &str = ".lock";

fn io_error(action: &str, path: &Path, err: std::io::Error) -> QueueError {
    QueueError::unavailable(format!("{action} {}: {err}", path.display()))
}

fn file_name(item_id: QueueItemId, enqueued_at: Timestamp) -> String {
    format!(
        "{:020}_{}{MESSAGE_EXT}",
        enqueued_at.as_unix_micros().max(0),
        item_id
    )
}

fn parse_file_name(name: &str) -> Option<(Timestamp, QueueItemId)> {
    let stem = name.strip_suffix(MESSAGE_EXT)?;
    let (micros, id) = stem.split_once('_')?;
    let enqueued_at = Timestamp::from_unix_micros(micros.parse().ok()?)?;
    let id = id.parse().ok()?;
    Some((enqueued_at, id))
}

/// Message file names in `dir`, oldest first.
async fn message_names(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("listing", dir, e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("listing", dir, e))?
    {
        if let Some(name) = entry.file_name().to_str() {
            if parse_file_name(name).is_some() {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

async fn find_message(dir: &Path, id: QueueItemId) -> Result<Option<String>, QueueError> {
    Ok(message_names(dir)
        .await?
        .into_iter()
        .find(|name| parse_file_name(name).is_some_and(|(_, found)| found == id)))
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), QueueError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error("renaming", &tmp, e))
}

async fn read_item(dir: &Path, name: &str) -> Result<QueueItem, QueueError> {
    let (enqueued_at, id) = parse_file_name(name)
        .ok_or_else(|| QueueError::backend(format!("unexpected spool file name '{name}'")))?;
    let path = dir.join(name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| io_error("reading", &path, e))?;
    Ok(QueueItem {
        id,
        payload: NotificationPayload::from(bytes),
        enqueued_at,
    })
}

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

async fn create_dirs(root: &Path, dirs: &[&str]) -> Result<(), QueueError> {
    for dir in dirs {
        let path = root.join(dir);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error("creating", &path, e))?;
    }
    Ok(())
}

/// Durable work queue stored as one file per item.
#[derive(Debug)]
pub struct SpoolQueue {
    root: PathBuf,
    // Serialises claims within this handle.
    claim_lock: Mutex<()>,
    _owner: LockFile,
}

impl SpoolQueue {
    /// Opens (creating if needed) the spool at `root`, takes ownership of it,
    /// and returns any items left claimed by a previous owner to the pending
    /// set.
    ///
    /// # Errors
    ///
    /// [`QueueError::Locked`] if another handle, in this or another process,
    /// owns the spool.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        create_dirs(&root, &[PENDING_DIR, CLAIMED_DIR, DEAD_DIR]).await?;

        let lock_path = root.join(LOCK_FILE);
        let owner = LockFile::try_acquire(&lock_path)
            .map_err(|e| io_error("locking", &lock_path, e))?
            .ok_or_else(|| QueueError::Locked {
                path: lock_path.display().to_string(),
            })?;
        tracing::debug!(lock = %owner.path().display(), "took ownership of the spool");

        let queue = Self {
            root,
            claim_lock: Mutex::new(()),
            _owner: owner,
        };
        let recovered = queue.recover_claimed().await?;
        if recovered > 0 {
            tracing::info!(recovered, "returned previously claimed queue items to pending");
        }
        Ok(queue)
    }

    /// Dead-letter queue stored alongside this spool.
    pub fn dead_letters(&self) -> SpoolDeadLetters {
        SpoolDeadLetters {
            root: self.root.clone(),
        }
    }

    fn pending_dir(&self) -> PathBuf {
        self.root.join(PENDING_DIR)
    }

    fn claimed_dir(&self) -> PathBuf {
        self.root.join(CLAIMED_DIR)
    }

    async fn recover_claimed(&self) -> Result<usize, QueueError> {
        let claimed = self.claimed_dir();
        let pending = self.pending_dir();
        let names = message_names(&claimed).await?;
        for name in &names {
            let from = claimed.join(name);
            tokio::fs::rename(&from, pending.join(name))
                .await
                .map_err(|e| io_error("recovering", &from, e))?;
        }
        Ok(names.len())
    }

    async fn move_claimed(&self, id: QueueItemId, to: Option<&Path>) -> Result<(), QueueError> {
        let claimed = self.claimed_dir();
        let name = find_message(&claimed, id)
            .await?
            .ok_or(QueueError::UnknownItem { id })?;
        let from = claimed.join(&name);
        match to {
            Some(dir) => tokio::fs::rename(&from, dir.join(&name))
                .await
                .map_err(|e| io_error("releasing", &from, e)),
            None => tokio::fs::remove_file(&from)
                .await
                .map_err(|e| io_error("removing", &from, e)),
        }
    }
}

#[async_trait]
impl WorkQueue for SpoolQueue {
    async fn enqueue(&self, payload: NotificationPayload) -> Result<QueueItemId, QueueError> {
        let item = QueueItem::new(payload);
        let path = self.pending_dir().join(file_name(item.id, item.enqueued_at));
        write_new(&path, item.payload.as_bytes()).await?;
        Ok(item.id)
    }

    async fn claim(&self) -> Result<Option<QueueItem>, QueueError> {
        let _guard = self.claim_lock.lock().await;
        let pending = self.pending_dir();
        let claimed = self.claimed_dir();

        for name in message_names(&pending).await? {
            match tokio::fs::rename(pending.join(&name), claimed.join(&name)).await {
                Ok(()) => return read_item(&claimed, &name).await.map(Some),
                // Removed between listing and renaming.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("claiming", &pending.join(&name), e)),
            }
        }
        Ok(None)
    }

    async fn delete(&self, id: QueueItemId) -> Result<(), QueueError> {
        self.move_claimed(id, None).await
    }

    async fn release(&self, id: QueueItemId) -> Result<(), QueueError> {
        let pending = self.pending_dir();
        self.move_claimed(id, Some(&pending)).await
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(message_names(&self.pending_dir()).await?.len())
    }
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct DeadLetterMeta {
    reason: String,
    dead_lettered_at: Timestamp,
}

/// Dead letters stored in the `dead/` directory of a spool.
#[derive(Debug, Clone)]
pub struct SpoolDeadLetters {
    root: PathBuf,
}

impl SpoolDeadLetters {
    /// Opens the dead letters of the spool at `root` without taking ownership
    /// of the spool: claimed items are left alone and no lock is taken.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        create_dirs(&root, &[PENDING_DIR, DEAD_DIR]).await?;
        Ok(Self { root })
    }

    /// Moves a dead letter back to the pending set under its original id.
    ///
    /// Returns `None` if no dead letter has that id.
    pub async fn requeue(&self, id: QueueItemId) -> Result<Option<QueueItemId>, QueueError> {
        let dir = self.dir();
        let Some(name) = find_message(&dir, id).await? else {
            return Ok(None);
        };
        let from = dir.join(&name);
        tokio::fs::rename(&from, self.root.join(PENDING_DIR).join(&name))
            .await
            .map_err(|e| io_error("requeueing", &from, e))?;
        self.remove_meta(&name).await?;
        Ok(Some(id))
    }

    fn dir(&self) -> PathBuf {
        self.root.join(DEAD_DIR)
    }

    fn meta_path(&self, message_name: &str) -> PathBuf {
        let stem = message_name
            .strip_suffix(MESSAGE_EXT)
            .unwrap_or(message_name);
        self.dir().join(format!("{stem}{META_EXT}"))
    }

    async fn remove_meta(&self, message_name: &str) -> Result<(), QueueError> {
        let meta_path = self.meta_path(message_name);
        match tokio::fs::remove_file(&meta_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("removing", &meta_path, e)),
        }
    }

    async fn read(&self, name: &str) -> Result<DeadLetter, QueueError> {
        let item = read_item(&self.dir(), name).await?;
        let meta_path = self.meta_path(name);
        let meta = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                QueueError::backend(format!("{} is not dead-letter metadata: {e}", meta_path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DeadLetterMeta {
                reason: String::from("unknown"),
                dead_lettered_at: item.enqueued_at,
            },
            Err(e) => return Err(io_error("reading", &meta_path, e)),
        };
        Ok(DeadLetter {
            item,
            reason: meta.reason,
            dead_lettered_at: meta.dead_lettered_at,
        })
    }
}

#[async_trait]
impl DeadLetterQueue for SpoolDeadLetters {
    async fn push(&self, item: QueueItem, reason: String) -> Result<(), QueueError> {
        let name = file_name(item.id, item.enqueued_at);
        let meta = DeadLetterMeta {
            reason,
            dead_lettered_at: Timestamp::now(),
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| QueueError::backend(format!("serialising dead-letter metadata: {e}")))?;

        // Metadata first: a message file without metadata still lists, the
        // reverse would lose the payload.
        write_new(&self.meta_path(&name), &meta_bytes).await?;
        write_new(&self.dir().join(&name), item.payload.as_bytes()).await
    }

    async fn list(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let mut out = Vec::new();
        for name in message_names(&self.dir()).await? {
            out.push(self.read(&name).await?);
        }
        Ok(out)
    }

    async fn take(&self, id: QueueItemId) -> Result<Option<DeadLetter>, QueueError> {
        let dir = self.dir();
        let Some(name) = find_message(&dir, id).await? else {
            return Ok(None);
        };
        let dead = self.read(&name).await?;

        let path = dir.join(&name);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_error("removing", &path, e))?;
        self.remove_meta(&name).await?;
        Ok(Some(dead))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn file_names_round_trip() {
        let id = QueueItemId::new_random();
        let at = Timestamp::from_unix_micros(1_700_000_000_000_001).expect("in range");
        let name = file_name(id, at);
        assert!(name.starts_with("00001700000000000001_"));
        assert_eq!(parse_file_name(&name), Some((at, id)));
        assert_eq!(parse_file_name("notes.txt"), None);
        assert_eq!(parse_file_name("123_not-a-uuid.msg"), None);
    }

    #[tokio::test]
    async fn payload_bytes_survive_the_spool_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        let payload = NotificationPayload::new(vec![0xff, 0x00, b'{']);

        let id = queue.enqueue(payload.clone()).await.expect("enqueue");
        let item = queue.claim().await.expect("claim").expect("pending item");

        assert_eq!(item.id, id);
        assert_eq!(item.payload, payload);
        queue.delete(id).await.expect("delete");
        assert_eq!(queue.pending_count().await.expect("count"), 0);
        assert!(queue.claim().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn released_items_are_claimed_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        let id = queue.enqueue("one".into()).await.expect("enqueue");

        let item = queue.claim().await.expect("claim").expect("pending item");
        assert_eq!(queue.pending_count().await.expect("count"), 0);
        queue.release(item.id).await.expect("release");

        let again = queue.claim().await.expect("claim").expect("pending item");
        assert_eq!(again.id, id);
    }

    #[tokio::test]
    async fn reopening_recovers_items_claimed_by_a_previous_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        let id = queue.enqueue("one".into()).await.expect("enqueue");
        queue.claim().await.expect("claim").expect("pending item");
        drop(queue);

        let reopened = SpoolQueue::open(dir.path()).await.expect("reopen");
        assert_eq!(reopened.pending_count().await.expect("count"), 1);
        let item = reopened.claim().await.expect("claim").expect("pending item");
        assert_eq!(item.id, id);
    }

    #[tokio::test]
    async fn a_second_owner_is_refused_and_leaves_live_claims_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        let id = queue.enqueue("one".into()).await.expect("enqueue");
        queue.claim().await.expect("claim").expect("pending item");

        let err = SpoolQueue::open(dir.path()).await.expect_err("already owned");
        assert!(matches!(err, QueueError::Locked { .. }), "{err}");
        let dead = SpoolDeadLetters::open(dir.path()).await.expect("open dead letters");
        assert!(dead.list().await.expect("list").is_empty());

        assert_eq!(queue.pending_count().await.expect("count"), 0);
        queue.delete(id).await.expect("acknowledge after the other opens");
        assert!(queue.claim().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn requeued_dead_letters_are_claimed_again_under_their_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        queue.enqueue("{broken".into()).await.expect("enqueue");
        let item = queue.claim().await.expect("claim").expect("pending item");
        let id = item.id;
        queue
            .dead_letters()
            .push(item, "malformed notification payload".into())
            .await
            .expect("push");
        queue.delete(id).await.expect("delete");

        let dead = SpoolDeadLetters::open(dir.path()).await.expect("open dead letters");
        assert_eq!(dead.requeue(id).await.expect("requeue"), Some(id));
        assert_eq!(dead.requeue(id).await.expect("requeue"), None);
        assert!(dead.list().await.expect("list").is_empty());

        let again = queue.claim().await.expect("claim").expect("pending item");
        assert_eq!(again.id, id);
        assert_eq!(again.payload.as_bytes(), b"{broken");
    }

    #[tokio::test]
    async fn acknowledging_an_unclaimed_item_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        let id = queue.enqueue("one".into()).await.expect("enqueue");

        assert!(matches!(
            queue.delete(id).await,
            Err(QueueError::UnknownItem { .. })
        ));
    }

    #[tokio::test]
    async fn dead_letters_keep_payload_and_reason() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path()).await.expect("open");
        let dead = queue.dead_letters();

        queue.enqueue("{broken".into()).await.expect("enqueue");
        let item = queue.claim().await.expect("claim").expect("pending item");
        let id = item.id;
        dead.push(item.clone(), "malformed notification payload".into())
            .await
            .expect("push");
        queue.delete(id).await.expect("delete");

        let listed = dead.list().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].item, item);
        assert_eq!(listed[0].reason, "malformed notification payload");

        let taken = dead.take(id).await.expect("take").expect("present");
        assert_eq!(taken.item.payload.as_bytes(), b"{broken");
        assert!(dead.list().await.expect("list").is_empty());
    }
}
