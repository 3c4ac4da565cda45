//! EmbeddedStore: an in-process coordination store.
//!
//! Holds the whole node tree in memory behind one mutex. Persistent nodes
//! are written through to redb so configuration, bookkeeping and logs
//! survive a restart; ephemeral nodes belong to a session and never reach
//! disk. Any number of `StoreClient`s (one per manager) can share a store,
//! each with its own session and watch channel.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::{CoordinationStore, NodeKind, SessionId, WatchEvent, WatchKind};
use crate::error::{StoreError, StoreResult};
use crate::tables::NODES;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Digits in a sequential node suffix.
const SEQUENCE_WIDTH: usize = 10;

type Subscribers = HashMap<u64, mpsc::UnboundedSender<WatchEvent>>;

struct Node {
    value: Vec<u8>,
    /// Owning session for ephemeral nodes.
    owner: Option<SessionId>,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    sequences: HashMap<String, u64>,
    live_sessions: HashSet<SessionId>,
    next_session: SessionId,
    next_client: u64,
    watches: HashMap<(String, WatchKind), Subscribers>,
}

struct Inner {
    db: Database,
    tree: Mutex<Tree>,
}

/// Thread-safe coordination store shared by every client in the process.
#[derive(Clone)]
pub struct EmbeddedStore {
    inner: Arc<Inner>,
}

impl EmbeddedStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing and single-process fleets).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StoreResult<Self> {
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;

        let mut tree = Tree {
            next_session: 1,
            next_client: 1,
            ..Default::default()
        };
        {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                tree.nodes.insert(
                    key.value().to_string(),
                    Node {
                        value: value.value().to_vec(),
                        owner: None,
                    },
                );
            }
        }
        tree.rebuild_sequences();
        debug!(nodes = tree.nodes.len(), "coordination tree loaded");

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                tree: Mutex::new(tree),
            }),
        })
    }

    /// Open a new client with a fresh session.
    pub fn client(&self) -> StoreResult<StoreClient> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut tree = self.inner.tree.lock().expect("tree lock");
            let id = tree.next_client;
            tree.next_client += 1;
            id
        };
        let client = StoreClient {
            store: self.clone(),
            id,
            session: Mutex::new(None),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        };
        client.connect()?;
        Ok(client)
    }

    /// Forcibly end a session, as a lost connection would. Returns the
    /// number of ephemeral nodes removed.
    pub fn expire_session(&self, session: SessionId) -> usize {
        let mut tree = self.inner.tree.lock().expect("tree lock");
        let removed = tree.expire(session);
        info!(session, removed, "session expired");
        removed
    }

    /// Every node path currently held, in order.
    pub fn paths(&self) -> Vec<String> {
        let tree = self.inner.tree.lock().expect("tree lock");
        tree.nodes.keys().cloned().collect()
    }

    fn open_session(&self) -> SessionId {
        let mut tree = self.inner.tree.lock().expect("tree lock");
        let session = tree.next_session;
        tree.next_session += 1;
        tree.live_sessions.insert(session);
        debug!(session, "session opened");
        session
    }

    fn is_live(&self, session: SessionId) -> bool {
        let tree = self.inner.tree.lock().expect("tree lock");
        tree.live_sessions.contains(&session)
    }
}

impl Inner {
    fn persist(&self, path: &str, value: &[u8]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table.insert(path, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn unpersist(&self, paths: &[String]) -> StoreResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for path in paths {
                table.remove(path.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn set(&self, session: SessionId, path: &str, value: &[u8], kind: NodeKind) -> StoreResult<()> {
        let mut tree = self.tree.lock().expect("tree lock");
        tree.check(session)?;
        self.set_locked(&mut tree, session, path, value, kind)
    }

    fn set_locked(
        &self,
        tree: &mut Tree,
        session: SessionId,
        path: &str,
        value: &[u8],
        kind: NodeKind,
    ) -> StoreResult<()> {
        let introduced = tree.introduced_by(path);
        let was_persistent = tree.nodes.get(path).is_some_and(|n| n.owner.is_none());
        let owner = match kind {
            NodeKind::Persistent => {
                self.persist(path, value)?;
                None
            }
            NodeKind::Ephemeral => {
                if was_persistent {
                    self.unpersist(&[path.to_string()])?;
                }
                Some(session)
            }
        };
        tree.nodes.insert(
            path.to_string(),
            Node {
                value: value.to_vec(),
                owner,
            },
        );
        tree.fire(path, WatchKind::Data);
        for parent in introduced {
            tree.fire(&parent, WatchKind::Children);
        }
        Ok(())
    }

    fn create_exclusive(
        &self,
        session: SessionId,
        path: &str,
        value: &[u8],
        kind: NodeKind,
    ) -> StoreResult<bool> {
        let mut tree = self.tree.lock().expect("tree lock");
        tree.check(session)?;
        if tree.nodes.contains_key(path) {
            return Ok(false);
        }
        self.set_locked(&mut tree, session, path, value, kind)?;
        Ok(true)
    }

    fn create_sequential(&self, session: SessionId, prefix: &str, value: &[u8]) -> StoreResult<String> {
        let mut tree = self.tree.lock().expect("tree lock");
        tree.check(session)?;
        let next = {
            let counter = tree.sequences.entry(prefix.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let path = format!("{prefix}{next:0width$}", width = SEQUENCE_WIDTH);
        self.set_locked(&mut tree, session, &path, value, NodeKind::Persistent)?;
        Ok(path)
    }

    fn delete(&self, session: SessionId, path: &str) -> StoreResult<bool> {
        let mut tree = self.tree.lock().expect("tree lock");
        tree.check(session)?;
        let removed = tree.remove_subtree(path);
        if removed.is_empty() {
            return Ok(false);
        }
        let persisted: Vec<String> = removed
            .iter()
            .filter(|(_, node)| node.owner.is_none())
            .map(|(key, _)| key.clone())
            .collect();
        self.unpersist(&persisted)?;
        Ok(true)
    }
}

impl Tree {
    fn check(&self, session: SessionId) -> StoreResult<()> {
        if self.live_sessions.contains(&session) {
            Ok(())
        } else {
            Err(StoreError::SessionExpired)
        }
    }

    fn rebuild_sequences(&mut self) {
        for key in self.nodes.keys() {
            if key.len() <= SEQUENCE_WIDTH || !key.is_char_boundary(key.len() - SEQUENCE_WIDTH) {
                continue;
            }
            let (prefix, digits) = key.split_at(key.len() - SEQUENCE_WIDTH);
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if let Ok(n) = digits.parse::<u64>() {
                let counter = self.sequences.entry(prefix.to_string()).or_insert(0);
                *counter = (*counter).max(n);
            }
        }
    }

    fn has_subtree(&self, path: &str) -> bool {
        if self.nodes.contains_key(path) {
            return true;
        }
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        let mut names = BTreeSet::new();
        for key in self.nodes.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            if let Some(name) = rest.split('/').next().filter(|n| !n.is_empty()) {
                names.insert(name.to_string());
            }
        }
        names.into_iter().collect()
    }

    /// Parents whose child set gains an entry when `path` is created.
    fn introduced_by(&self, path: &str) -> Vec<String> {
        ancestors(path)
            .into_iter()
            .filter(|p| !self.has_subtree(p))
            .map(|p| parent(&p).to_string())
            .collect()
    }

    /// Remove `path` and every node below it, firing watches.
    fn remove_subtree(&mut self, path: &str) -> Vec<(String, Node)> {
        let prefix = child_prefix(path);
        let mut keys: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if self.nodes.contains_key(path) {
            keys.push(path.to_string());
        }

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(node) = self.nodes.remove(&key) {
                self.fire(&key, WatchKind::Data);
                removed.push((key, node));
            }
        }
        if removed.is_empty() {
            return removed;
        }

        let watched_below: Vec<String> = self
            .watches
            .keys()
            .filter(|(p, kind)| {
                *kind == WatchKind::Children && (p == path || p.starts_with(&prefix))
            })
            .map(|(p, _)| p.clone())
            .collect();
        for watched in watched_below {
            self.fire(&watched, WatchKind::Children);
        }
        self.fire_vanished(path);
        removed
    }

    /// Remove exactly one node, leaving its descendants in place.
    fn remove_node(&mut self, path: &str) -> bool {
        if self.nodes.remove(path).is_none() {
            return false;
        }
        self.fire(path, WatchKind::Data);
        self.fire_vanished(path);
        true
    }

    /// Fire child watches on every parent whose child set lost `path` or
    /// one of its now-empty ancestors.
    fn fire_vanished(&mut self, path: &str) {
        for p in ancestors(path).into_iter().rev() {
            if self.has_subtree(&p) {
                break;
            }
            self.fire(parent(&p), WatchKind::Children);
        }
    }

    fn expire(&mut self, session: SessionId) -> usize {
        self.live_sessions.remove(&session);
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(key, _)| key.clone())
            .collect();
        owned.iter().filter(|path| self.remove_node(path)).count()
    }

    fn watch(&mut self, client: u64, path: &str, kind: WatchKind, tx: &mpsc::UnboundedSender<WatchEvent>) {
        self.watches
            .entry((path.to_string(), kind))
            .or_default()
            .insert(client, tx.clone());
    }

    fn unwatch_client(&mut self, client: u64) {
        self.watches.retain(|_, subscribers| {
            subscribers.remove(&client);
            !subscribers.is_empty()
        });
    }

    fn fire(&mut self, path: &str, kind: WatchKind) {
        if let Some(subscribers) = self.watches.remove(&(path.to_string(), kind)) {
            for tx in subscribers.into_values() {
                // A dropped receiver just means nobody is listening any more.
                let _ = tx.send(WatchEvent {
                    path: path.to_string(),
                    kind,
                });
            }
        }
    }
}

fn child_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

/// `a/b/c` -> `["a", "a/b", "a/b/c"]`.
fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut end = 0;
    for (i, ch) in path.char_indices() {
        if ch == '/' {
            out.push(path[..i].to_string());
        }
        end = i + ch.len_utf8();
    }
    if end > 0 {
        out.push(path.to_string());
    }
    out
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn validate(path: &str) -> StoreResult<&str> {
    let path = path.trim_matches('/');
    if path.split('/').any(str::is_empty) && !path.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

fn validate_node(path: &str) -> StoreResult<&str> {
    let path = validate(path)?;
    if path.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

/// One manager's connection to an `EmbeddedStore`.
pub struct StoreClient {
    store: EmbeddedStore,
    id: u64,
    session: Mutex<Option<SessionId>>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>,
}

impl StoreClient {
    fn live(&self) -> StoreResult<SessionId> {
        self.session
            .lock()
            .expect("session lock")
            .ok_or(StoreError::Disconnected)
    }

    fn inner(&self) -> &Inner {
        &self.store.inner
    }
}

impl CoordinationStore for StoreClient {
    fn connect(&self) -> StoreResult<SessionId> {
        let mut current = self.session.lock().expect("session lock");
        if let Some(session) = *current {
            if self.store.is_live(session) {
                return Ok(session);
            }
            // An expired session takes its watches with it.
            self.inner().tree.lock().expect("tree lock").unwatch_client(self.id);
        }
        let session = self.store.open_session();
        *current = Some(session);
        Ok(session)
    }

    fn close(&self) -> StoreResult<()> {
        let session = self.session.lock().expect("session lock").take();
        let mut tree = self.inner().tree.lock().expect("tree lock");
        tree.unwatch_client(self.id);
        if let Some(session) = session {
            let removed = tree.expire(session);
            debug!(session, removed, "session closed");
        }
        Ok(())
    }

    fn session(&self) -> Option<SessionId> {
        *self.session.lock().expect("session lock")
    }

    fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let session = self.live()?;
        let path = validate_node(path)?;
        let tree = self.inner().tree.lock().expect("tree lock");
        tree.check(session)?;
        Ok(tree.nodes.get(path).map(|n| n.value.clone()))
    }

    fn set(&self, path: &str, value: &[u8], kind: NodeKind) -> StoreResult<()> {
        let session = self.live()?;
        let path = validate_node(path)?;
        self.inner().set(session, path, value, kind)
    }

    fn create_sequential(&self, prefix: &str, value: &[u8]) -> StoreResult<String> {
        let session = self.live()?;
        let prefix = validate_node(prefix)?;
        self.inner().create_sequential(session, prefix, value)
    }

    fn create_exclusive(&self, path: &str, value: &[u8], kind: NodeKind) -> StoreResult<bool> {
        let session = self.live()?;
        let path = validate_node(path)?;
        self.inner().create_exclusive(session, path, value, kind)
    }

    fn delete(&self, path: &str) -> StoreResult<bool> {
        let session = self.live()?;
        let path = validate_node(path)?;
        self.inner().delete(session, path)
    }

    fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        let session = self.live()?;
        let path = validate(path)?;
        let tree = self.inner().tree.lock().expect("tree lock");
        tree.check(session)?;
        Ok(tree.children(path))
    }

    fn watch_data(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let session = self.live()?;
        let path = validate_node(path)?;
        let mut tree = self.inner().tree.lock().expect("tree lock");
        tree.check(session)?;
        tree.watch(self.id, path, WatchKind::Data, &self.events_tx);
        Ok(tree.nodes.get(path).map(|n| n.value.clone()))
    }

    fn watch_children(&self, path: &str) -> StoreResult<Vec<String>> {
        let session = self.live()?;
        let path = validate(path)?;
        let mut tree = self.inner().tree.lock().expect("tree lock");
        tree.check(session)?;
        tree.watch(self.id, path, WatchKind::Children, &self.events_tx);
        Ok(tree.children(path))
    }

    fn unwatch_all(&self) {
        self.inner().tree.lock().expect("tree lock").unwatch_client(self.id);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<WatchEvent>> {
        self.events_rx.lock().expect("events lock").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StoreExt;

    fn test_store() -> EmbeddedStore {
        EmbeddedStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_set_get_delete() {
        let store = test_store();
        let client = store.client().unwrap();
        client.set("endpoints/web/config", b"{}", NodeKind::Persistent).unwrap();
        assert_eq!(client.get("endpoints/web/config").unwrap().unwrap(), b"{}");
        assert_eq!(client.children("endpoints").unwrap(), vec!["web".to_string()]);
        assert!(client.delete("endpoints/web").unwrap());
        assert!(client.get("endpoints/web/config").unwrap().is_none());
        assert!(client.children("endpoints").unwrap().is_empty());
        assert!(!client.delete("endpoints/web").unwrap());
    }

    #[test]
    fn test_children_skip_lookalike_prefixes() {
        let store = test_store();
        let client = store.client().unwrap();
        client.set("a/b-x", b"1", NodeKind::Persistent).unwrap();
        client.set("a/b/c", b"2", NodeKind::Persistent).unwrap();
        assert_eq!(client.children("a").unwrap(), vec!["b".to_string(), "b-x".to_string()]);
        assert_eq!(client.children("a/b").unwrap(), vec!["c".to_string()]);
        assert_eq!(client.children("").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_ephemeral_nodes_die_with_session() {
        let store = test_store();
        let a = store.client().unwrap();
        let b = store.client().unwrap();
        a.set("managers/keys/k1", b"a", NodeKind::Ephemeral).unwrap();
        a.set("managers/configs/a", b"{}", NodeKind::Persistent).unwrap();

        let session = a.session().unwrap();
        assert_eq!(store.expire_session(session), 1);
        assert!(b.get("managers/keys/k1").unwrap().is_none());
        assert!(b.get("managers/configs/a").unwrap().is_some());

        assert!(matches!(a.get("managers/configs/a"), Err(StoreError::SessionExpired)));
        let fresh = a.connect().unwrap();
        assert_ne!(fresh, session);
        assert!(a.get("managers/configs/a").unwrap().is_some());
    }

    #[test]
    fn test_close_drops_ephemerals() {
        let store = test_store();
        let a = store.client().unwrap();
        let b = store.client().unwrap();
        a.set("managers/info/a", b"{}", NodeKind::Ephemeral).unwrap();
        a.close().unwrap();
        assert!(b.get("managers/info/a").unwrap().is_none());
        assert!(matches!(a.get("managers/info/a"), Err(StoreError::Disconnected)));
    }

    #[test]
    fn test_exclusive_create() {
        let store = test_store();
        let a = store.client().unwrap();
        let b = store.client().unwrap();
        assert!(a.create_exclusive("locks/10.0.0.1", b"a", NodeKind::Ephemeral).unwrap());
        assert!(!b.create_exclusive("locks/10.0.0.1", b"b", NodeKind::Ephemeral).unwrap());
        a.close().unwrap();
        assert!(b.create_exclusive("locks/10.0.0.1", b"b", NodeKind::Ephemeral).unwrap());
    }

    #[test]
    fn test_sequential_nodes_are_ordered() {
        let store = test_store();
        let client = store.client().unwrap();
        let first = client.create_sequential("log/entry-", b"1").unwrap();
        let second = client.create_sequential("log/entry-", b"2").unwrap();
        assert_eq!(first, "log/entry-0000000001");
        assert!(second > first);
        assert_eq!(client.children("log").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_watches_fire_once() {
        let store = test_store();
        let watcher = store.client().unwrap();
        let writer = store.client().unwrap();
        let mut events = watcher.take_events().unwrap();
        assert!(watcher.take_events().is_none());

        assert!(watcher.watch_children("endpoints").unwrap().is_empty());
        assert!(watcher.watch_data("endpoints/web/config").unwrap().is_none());

        writer.set("endpoints/web/config", b"{}", NodeKind::Persistent).unwrap();
        let mut seen = vec![events.recv().await.unwrap(), events.recv().await.unwrap()];
        seen.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            seen,
            vec![
                WatchEvent { path: "endpoints".to_string(), kind: WatchKind::Children },
                WatchEvent { path: "endpoints/web/config".to_string(), kind: WatchKind::Data },
            ]
        );

        // Not re-armed: a second write is silent.
        writer.set("endpoints/web/config", b"{\"weight\":2}", NodeKind::Persistent).unwrap();
        writer.set("endpoints/api/config", b"{}", NodeKind::Persistent).unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_child_watch_fires_on_ephemeral_expiry() {
        let store = test_store();
        let watcher = store.client().unwrap();
        let dying = store.client().unwrap();
        let mut events = watcher.take_events().unwrap();

        dying.set("managers/keys/k1", b"x", NodeKind::Ephemeral).unwrap();
        assert_eq!(watcher.watch_children("managers/keys").unwrap().len(), 1);
        store.expire_session(dying.session().unwrap());

        let event = events.recv().await.unwrap();
        assert_eq!(event.path, "managers/keys");
        assert_eq!(event.kind, WatchKind::Children);
    }

    #[test]
    fn test_json_helpers() {
        let store = test_store();
        let client = store.client().unwrap();
        client
            .set_json("managers/pending/a", &HashMap::from([("u".to_string(), 3u64)]), NodeKind::Ephemeral)
            .unwrap();
        let pending: HashMap<String, u64> = client.get_json("managers/pending/a").unwrap().unwrap();
        assert_eq!(pending["u"], 3);

        client.set("bad", b"not json", NodeKind::Persistent).unwrap();
        assert!(client.get_json::<HashMap<String, u64>>("bad").is_err());
    }

    #[test]
    fn test_invalid_paths() {
        let store = test_store();
        let client = store.client().unwrap();
        assert!(matches!(client.get(""), Err(StoreError::InvalidPath(_))));
        assert!(matches!(client.set("a//b", b"", NodeKind::Persistent), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ringscale.redb");
        {
            let store = EmbeddedStore::open(&path).unwrap();
            let client = store.client().unwrap();
            client.set("endpoints/web/state", b"\"RUNNING\"", NodeKind::Persistent).unwrap();
            client.set("managers/keys/k", b"x", NodeKind::Ephemeral).unwrap();
            client.create_sequential("endpoints/web/log/entry-", b"1").unwrap();
            client.delete("endpoints/gone").unwrap();
        }
        let store = EmbeddedStore::open(&path).unwrap();
        let client = store.client().unwrap();
        assert!(client.get("endpoints/web/state").unwrap().is_some());
        assert!(client.get("managers/keys/k").unwrap().is_none());
        let next = client.create_sequential("endpoints/web/log/entry-", b"2").unwrap();
        assert_eq!(next, "endpoints/web/log/entry-0000000002");
    }

    #[test]
    fn test_ancestors_and_parent() {
        assert_eq!(ancestors("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert!(ancestors("").is_empty());
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
    }
}
