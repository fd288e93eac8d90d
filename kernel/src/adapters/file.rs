// Persistent File Backend
//
// Each collection is an append-only JSON-lines file under the data
// directory. Every line records one write (insert or replace); the
// latest write for a key wins. The file is fsync'd before a write is
// acknowledged and the key index is rebuilt from the file on open.
//
// A data directory has one owner at a time: opening takes an exclusive
// lock on `<root>/.lock`, held until the backend and every collection
// opened from it are dropped.
//
// Layout:
//   <root>/.lock
//   <root>/documents.jsonl
//   <root>/documents_bundles.jsonl
//   <root>/journals.jsonl
//   <root>/changes.jsonl

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::collection::{
    record_key, Collection, CollectionError, FindQuery, Record, ReplaceResult, KEY_FIELD,
};
use crate::session::Backend;

const EXTENSION: &str = "jsonl";
const LOCK_FILE: &str = ".lock";

/// Exclusive lock on a data directory, released when dropped.
#[derive(Debug)]
struct DirLock {
    _file: File,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self, CollectionError> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.join(LOCK_FILE))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { _file: file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                warn!(path = %dir.display(), "data directory is locked");
                Err(CollectionError::Locked {
                    path: dir.to_path_buf(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Op {
    Insert,
    Replace,
}

/// One line of a collection file.
#[derive(Debug, Serialize, Deserialize)]
struct Entry<R> {
    op: Op,
    record: R,
}

#[derive(Debug)]
struct State {
    file: File,
    records: BTreeMap<String, Record>,
}

/// A collection persisted to a single JSON-lines file.
///
/// The lock is held across the uniqueness check and the durable write,
/// so two concurrent inserts of the same key cannot both succeed.
#[derive(Debug)]
pub struct FileCollection {
    name: String,
    path: PathBuf,
    state: Mutex<State>,
    _lock: Arc<DirLock>,
}

impl FileCollection {
    /// Opens or creates `<dir>/<name>.jsonl` and replays it.
    ///
    /// Fails with `Locked` while anything else owns `dir`.
    pub fn open(dir: &Path, name: &str) -> Result<Self, CollectionError> {
        let lock = Arc::new(DirLock::acquire(dir)?);
        Self::open_locked(dir, name, lock)
    }

    fn open_locked(dir: &Path, name: &str, lock: Arc<DirLock>) -> Result<Self, CollectionError> {
        let path = dir.join(format!("{name}.{EXTENSION}"));

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (records, valid_len) = replay(name, &contents)?;
        if valid_len < contents.len() {
            warn!(
                collection = name,
                discarded_bytes = contents.len() - valid_len,
                "discarding unterminated trailing write"
            );
            file.set_len(valid_len as u64)?;
            file.sync_data()?;
        }

        info!(collection = name, records = records.len(), path = %path.display(), "opened collection");

        Ok(Self {
            name: name.to_string(),
            path,
            state: Mutex::new(State { file, records }),
            _lock: lock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rebuilds the key index from raw file contents.
///
/// Returns the index and the length of the prefix made of complete
/// lines. Only the final line may be incomplete.
fn replay(
    name: &str,
    contents: &[u8],
) -> Result<(BTreeMap<String, Record>, usize), CollectionError> {
    let mut records = BTreeMap::new();
    let mut valid_len = 0;

    for (line_no, line) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
        if !line.ends_with(b"\n") {
            break;
        }
        valid_len += line.len();

        let body = &line[..line.len() - 1];
        if body.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let corrupted = |reason: String| CollectionError::Corrupted {
            collection: name.to_string(),
            reason: format!("line {}: {reason}", line_no + 1),
        };

        let Entry { op, record } = serde_json::from_slice::<Entry<Record>>(body)
            .map_err(|e| corrupted(e.to_string()))?;
        let key = record_key(&record)
            .map_err(|e| corrupted(e.to_string()))?
            .to_string();

        match (op, records.contains_key(&key)) {
            (Op::Insert, true) => return Err(corrupted(format!("duplicate insert of `{key}`"))),
            (Op::Replace, false) => return Err(corrupted(format!("replace of missing `{key}`"))),
            _ => {}
        }
        records.insert(key, record);
    }

    Ok((records, valid_len))
}

/// Write side of a collection file.
trait LogFile: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends one durable line. On failure the file is cut back to its
/// previous end, so no fragment is left for the next line to follow.
fn append(file: &mut impl LogFile, op: Op, record: &Record) -> Result<(), CollectionError> {
    let mut line = serde_json::to_vec(&Entry { op, record })?;
    line.push(b'\n');

    let end = file.end()?;
    if let Err(err) = file.write_all(&line).and_then(|()| file.sync()) {
        match file.truncate(end).and_then(|()| file.sync()) {
            Ok(()) => warn!(error = %err, "write failed, rolled back"),
            Err(rollback) => error!(error = %err, %rollback, "write failed, rollback failed"),
        }
        return Err(err.into());
    }
    Ok(())
}

impl Collection for FileCollection {
    fn insert_one(&self, record: Record) -> Result<(), CollectionError> {
        let key = record_key(&record)?.to_string();
        let mut state = self.state.lock();

        if state.records.contains_key(&key) {
            return Err(CollectionError::DuplicateKey(key));
        }

        append(&mut state.file, Op::Insert, &record)?;
        state.records.insert(key, record);
        Ok(())
    }

    fn replace_one(&self, key: &str, mut record: Record) -> Result<ReplaceResult, CollectionError> {
        let mut state = self.state.lock();

        if !state.records.contains_key(key) {
            return Ok(ReplaceResult { matched_count: 0 });
        }

        // The primary key of a stored record never changes.
        record.insert(KEY_FIELD.into(), key.into());
        append(&mut state.file, Op::Replace, &record)?;
        state.records.insert(key.to_string(), record);
        Ok(ReplaceResult { matched_count: 1 })
    }

    fn find_one(&self, key: &str) -> Result<Option<Record>, CollectionError> {
        Ok(self.state.lock().records.get(key).cloned())
    }

    fn find(&self, query: &FindQuery) -> Result<Vec<Record>, CollectionError> {
        let matching = self
            .state
            .lock()
            .records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        Ok(query.finish(matching))
    }
}

/// Persistent backend rooted at a data directory.
///
/// Collections are opened lazily and shared by name, so every store
/// built from the same backend sees the same writes.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    lock: Arc<DirLock>,
    collections: Mutex<BTreeMap<String, Arc<FileCollection>>>,
}

impl FileBackend {
    /// Takes ownership of the data directory `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CollectionError> {
        let root = root.into();
        let lock = Arc::new(DirLock::acquire(&root)?);
        Ok(Self {
            root,
            lock,
            collections: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Backend for FileBackend {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, CollectionError> {
        let mut collections = self.collections.lock();

        let collection = match collections.get(name) {
            Some(existing) => existing.clone(),
            None => {
                let opened = Arc::new(FileCollection::open_locked(
                    &self.root,
                    name,
                    self.lock.clone(),
                )?);
                collections.insert(name.to_string(), opened.clone());
                opened
            }
        };
        Ok(collection as Arc<dyn Collection>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::contract;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    /// In-memory file that accepts `room` bytes in total, then fails.
    struct Disk {
        bytes: Vec<u8>,
        room: usize,
    }

    impl Write for Disk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let free = self.room.saturating_sub(self.bytes.len());
            if free == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = free.min(buf.len());
            self.bytes.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for Disk {
        fn end(&self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn file_collection_contract() {
        let dir = TempDir::new().unwrap();
        contract::check_collection(&FileCollection::open(dir.path(), "contract").unwrap());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let collection = FileCollection::open(dir.path(), "documents").unwrap();
            collection
                .insert_one(record(json!({"_id": "doc-1", "v": 1})))
                .unwrap();
            collection
                .replace_one("doc-1", record(json!({"_id": "doc-1", "v": 2})))
                .unwrap();
            collection
                .insert_one(record(json!({"_id": "doc-2", "v": 1})))
                .unwrap();
        }

        let reopened = FileCollection::open(dir.path(), "documents").unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.find_one("doc-1").unwrap(),
            Some(record(json!({"_id": "doc-1", "v": 2})))
        );
        assert!(matches!(
            reopened.insert_one(record(json!({"_id": "doc-2"}))),
            Err(CollectionError::DuplicateKey(_))
        ));
    }

    #[test]
    fn unterminated_trailing_line_is_discarded() {
        let dir = TempDir::new().unwrap();
        {
            let collection = FileCollection::open(dir.path(), "changes").unwrap();
            collection
                .insert_one(record(json!({"_id": "t1", "timestamp": "t1"})))
                .unwrap();
        }

        let path = dir.path().join("changes.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"op":"insert","record":{"_id":"t2""#)
            .unwrap();
        drop(file);

        let reopened = FileCollection::open(dir.path(), "changes").unwrap();
        assert_eq!(reopened.len(), 1);

        reopened
            .insert_one(record(json!({"_id": "t2", "timestamp": "t2"})))
            .unwrap();
        drop(reopened);

        let again = FileCollection::open(dir.path(), "changes").unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn garbage_in_the_middle_is_corruption() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("documents.jsonl"),
            "not json\n{\"op\":\"insert\",\"record\":{\"_id\":\"a\"}}\n",
        )
        .unwrap();

        assert!(matches!(
            FileCollection::open(dir.path(), "documents"),
            Err(CollectionError::Corrupted { .. })
        ));
    }

    #[test]
    fn failed_write_leaves_no_fragment() {
        let mut disk = Disk {
            bytes: Vec::new(),
            room: usize::MAX,
        };
        append(&mut disk, Op::Insert, &record(json!({"_id": "t1"}))).unwrap();
        let committed = disk.bytes.clone();

        disk.room = committed.len() + 8;
        let err = append(&mut disk, Op::Insert, &record(json!({"_id": "t2"}))).unwrap_err();
        assert!(matches!(err, CollectionError::Io(_)));
        assert_eq!(disk.bytes, committed);

        disk.room = usize::MAX;
        append(&mut disk, Op::Insert, &record(json!({"_id": "t3"}))).unwrap();

        let (records, valid_len) = replay("changes", &disk.bytes).unwrap();
        assert_eq!(records.keys().map(String::as_str).collect::<Vec<_>>(), ["t1", "t3"]);
        assert_eq!(valid_len, disk.bytes.len());
    }

    #[test]
    fn data_directory_has_one_owner() {
        let dir = TempDir::new().unwrap();
        let first = FileBackend::open(dir.path()).unwrap();
        let documents = first.collection("documents").unwrap();
        documents.insert_one(record(json!({"_id": "doc-1"}))).unwrap();

        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(CollectionError::Locked { .. })
        ));
        assert!(matches!(
            FileCollection::open(dir.path(), "documents"),
            Err(CollectionError::Locked { .. })
        ));

        // open collections keep the directory owned
        drop(first);
        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(CollectionError::Locked { .. })
        ));

        drop(documents);
        let second = FileBackend::open(dir.path()).unwrap();
        let documents = second.collection("documents").unwrap();
        assert!(documents.find_one("doc-1").unwrap().is_some());
        assert!(matches!(
            documents.insert_one(record(json!({"_id": "doc-1"}))),
            Err(CollectionError::DuplicateKey(_))
        ));
    }

    #[test]
    fn backend_shares_collections_by_name() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path().join("data")).unwrap();

        let a = backend.collection("journals").unwrap();
        a.insert_one(record(json!({"_id": "j-1"}))).unwrap();

        let b = backend.collection("journals").unwrap();
        assert!(b.find_one("j-1").unwrap().is_some());
        assert!(backend.root().join("journals.jsonl").exists());
    }
}
