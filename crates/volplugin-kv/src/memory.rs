//! In-process key-value store.
//!
//! `MemoryClient` implements the full [`Client`] contract against a
//! `BTreeMap` behind one mutex, so every compare-and-swap is linearizable.
//! Clones share the same store and event stream, which lets tests model
//! several hosts contending on one namespace.
//!
//! Directories are either explicit (created with `SetOptions::dir`) or
//! implicit (any key that has descendants). Expired keys are reaped before
//! every operation and reported to watchers as deletions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use volplugin_common::{Result, StopHandle, VolpluginError};

use crate::client::{
    Client, DeleteOptions, DumpFormat, ExistPolicy, GetOptions, Node, Notifier, SetOptions,
    WatchHandler,
};
use crate::pather::PathBuilder;

const EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct StoredNode {
    value: Vec<u8>,
    dir: bool,
    expires_at: Option<Instant>,
}

enum Existing {
    Leaf(Vec<u8>),
    Dir { empty: bool },
}

type Store = BTreeMap<String, StoredNode>;

/// In-memory [`Client`] implementation.
#[derive(Clone)]
pub struct MemoryClient {
    pather: PathBuilder,
    store: Arc<Mutex<Store>>,
    events: broadcast::Sender<Node>,
    watchers: Arc<DashMap<String, Vec<(u64, mpsc::Sender<()>)>>>,
    next_watch: Arc<AtomicU64>,
}

impl MemoryClient {
    /// Empty store rooted at `prefix`, rendering keys etcd-style.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self::with_pather(PathBuilder::etcd(prefix))
    }

    pub fn with_pather(pather: PathBuilder) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pather,
            store: Arc::new(Mutex::new(BTreeMap::new())),
            events,
            watchers: Arc::new(DashMap::new()),
            next_watch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live value keys.
    pub fn len(&self) -> usize {
        self.reap_now();
        self.store.lock().values().filter(|node| !node.dir).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically reap expired keys so watchers see expirations even when
    /// nobody touches the store.
    pub fn start_reaper(&self, interval: Duration) -> StopHandle {
        let client = self.clone();
        StopHandle::spawn(move |mut stop| async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = tokio::time::sleep(interval) => client.reap_now(),
                }
            }
        })
    }

    fn reap_now(&self) {
        let mut store = self.store.lock();
        self.reap(&mut store);
    }

    fn child_prefix(&self, key: &str) -> String {
        format!("{}{}", key, self.pather.separator())
    }

    fn emit(&self, node: Node) {
        // no receivers is fine
        let _ = self.events.send(node);
    }

    fn reap(&self, store: &mut Store) {
        let now = Instant::now();
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, node)| node.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(node) = store.remove(&key) {
                debug!(key = %key, "Key expired");
                self.emit(Node {
                    key,
                    dir: node.dir,
                    ..Default::default()
                });
            }
        }
    }

    fn existing(&self, store: &Store, key: &str) -> Option<Existing> {
        let prefix = self.child_prefix(key);
        let has_children = store
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix));

        match store.get(key) {
            Some(node) if !node.dir => Some(Existing::Leaf(node.value.clone())),
            Some(_) => Some(Existing::Dir {
                empty: !has_children,
            }),
            None if has_children => Some(Existing::Dir { empty: false }),
            None => None,
        }
    }

    fn check_ancestors(&self, store: &Store, path: &PathBuilder) -> Result<()> {
        let segments = path.segments();
        for depth in 1..segments.len() {
            let ancestor = path.replace(&segments[..depth])?.to_string();
            if store.get(&ancestor).is_some_and(|node| !node.dir) {
                return Err(VolpluginError::InvalidPath(format!(
                    "{} is not a directory",
                    ancestor
                )));
            }
        }

        Ok(())
    }

    fn build_dir(&self, store: &Store, key: &str, recursive: bool) -> Node {
        let prefix = self.child_prefix(key);
        let sep = self.pather.separator();

        let names: BTreeSet<&str> = store
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split(sep).next())
            .filter(|name| !name.is_empty())
            .collect();

        let nodes = names
            .into_iter()
            .map(|name| {
                let child = format!("{}{}", prefix, name);
                match store.get(&child) {
                    Some(node) if !node.dir => Node::leaf(child, node.value.clone()),
                    _ if recursive => self.build_dir(store, &child, true),
                    _ => Node {
                        key: child,
                        dir: true,
                        ..Default::default()
                    },
                }
            })
            .collect();

        Node {
            key: key.to_string(),
            dir: true,
            value: Vec::new(),
            nodes,
        }
    }

    fn path_matches(watched: &str, key: &str, recursive: bool, sep: char) -> bool {
        if key == watched {
            return true;
        }

        recursive
            && key
                .strip_prefix(watched)
                .is_some_and(|rest| rest.starts_with(sep))
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn get(&self, path: &PathBuilder, opts: &GetOptions) -> Result<Node> {
        let key = path.to_string();
        let mut store = self.store.lock();
        self.reap(&mut store);

        match self.existing(&store, &key) {
            Some(Existing::Leaf(value)) => Ok(Node::leaf(key, value)),
            Some(Existing::Dir { .. }) => Ok(self.build_dir(&store, &key, opts.recursive)),
            None => Err(VolpluginError::NotExists(key)),
        }
    }

    async fn set(&self, path: &PathBuilder, value: &[u8], opts: &SetOptions) -> Result<()> {
        let key = path.to_string();
        let mut store = self.store.lock();
        self.reap(&mut store);

        self.check_ancestors(&store, path)?;
        let existing = self.existing(&store, &key);

        if matches!(existing, Some(Existing::Dir { .. })) && !opts.dir {
            return Err(VolpluginError::InvalidPath(format!(
                "{} is a directory",
                key
            )));
        }

        match opts.exist {
            ExistPolicy::Ignore => {}
            ExistPolicy::Exist => {
                if existing.is_none() {
                    return Err(VolpluginError::NotExists(key));
                }
            }
            ExistPolicy::NoExist => {
                if existing.is_some() {
                    return Err(VolpluginError::Exists(key));
                }
            }
            ExistPolicy::Value => {
                if opts.value.is_none() {
                    return Err(VolpluginError::Internal(
                        "value precondition without a value".to_string(),
                    ));
                }
            }
        }

        if opts.exist != ExistPolicy::NoExist
            && let Some(expected) = &opts.value
        {
            match &existing {
                None => return Err(VolpluginError::NotExists(key)),
                Some(Existing::Leaf(current)) if current == expected => {}
                Some(_) => {
                    return Err(VolpluginError::LockMismatch(format!(
                        "compare failed: {}",
                        key
                    )));
                }
            }
        }

        let expires_at = opts
            .ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Instant::now() + ttl);
        let stored = StoredNode {
            value: if opts.dir { Vec::new() } else { value.to_vec() },
            dir: opts.dir,
            expires_at,
        };

        self.emit(Node {
            key: key.clone(),
            dir: stored.dir,
            value: stored.value.clone(),
            nodes: Vec::new(),
        });
        store.insert(key, stored);
        Ok(())
    }

    async fn delete(&self, path: &PathBuilder, opts: &DeleteOptions) -> Result<()> {
        let key = path.to_string();
        let mut store = self.store.lock();
        self.reap(&mut store);

        match self.existing(&store, &key) {
            None => Err(VolpluginError::NotExists(key)),
            Some(Existing::Leaf(current)) => {
                if let Some(expected) = &opts.value
                    && expected != &current
                {
                    return Err(VolpluginError::LockMismatch(format!(
                        "compare failed: {}",
                        key
                    )));
                }

                store.remove(&key);
                self.emit(Node {
                    key,
                    ..Default::default()
                });
                Ok(())
            }
            Some(Existing::Dir { empty }) => {
                if !opts.dir && !opts.recursive {
                    return Err(VolpluginError::InvalidPath(format!(
                        "{} is a directory",
                        key
                    )));
                }

                if !empty && !opts.recursive {
                    return Err(VolpluginError::Internal(format!(
                        "directory not empty: {}",
                        key
                    )));
                }

                let prefix = self.child_prefix(&key);
                let doomed: Vec<String> = store
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, _)| k.clone())
                    .collect();

                for child in doomed {
                    if let Some(node) = store.remove(&child) {
                        self.emit(Node {
                            key: child,
                            dir: node.dir,
                            ..Default::default()
                        });
                    }
                }

                store.remove(&key);
                self.emit(Node {
                    key,
                    dir: true,
                    ..Default::default()
                });
                Ok(())
            }
        }
    }

    fn watch(
        &self,
        path: &PathBuilder,
        notify: Notifier,
        recursive: bool,
        handler: WatchHandler,
    ) -> (StopHandle, mpsc::UnboundedReceiver<VolpluginError>) {
        let watched = path.to_string();
        let sep = self.pather.separator();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (path_stop_tx, mut path_stop) = mpsc::channel(1);
        let mut events = self.events.subscribe();
        let watch_id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        let watchers = self.watchers.clone();

        watchers
            .entry(watched.clone())
            .or_default()
            .push((watch_id, path_stop_tx));

        let handle = StopHandle::spawn(move |mut stop| async move {
            debug!(path = %watched, recursive, "Watch started");

            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = path_stop.recv() => break,
                    event = events.recv() => match event {
                        Ok(node) => {
                            if !Self::path_matches(&watched, &node.key, recursive, sep) {
                                continue;
                            }

                            if let Err(e) = handler(node, &notify) {
                                let _ = err_tx.send(e);
                            }

                            if notify.is_closed() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(path = %watched, missed, "Watch fell behind");
                            let _ = err_tx.send(VolpluginError::Internal(format!(
                                "watch on {} missed {} events",
                                watched, missed
                            )));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            if let Some(mut stops) = watchers.get_mut(&watched) {
                stops.retain(|(id, _)| *id != watch_id);
            }
            watchers.remove_if(&watched, |_, stops| stops.is_empty());

            debug!(path = %watched, "Watch stopped");
        });

        (handle, err_rx)
    }

    fn watch_stop(&self, path: &PathBuilder) {
        if let Some((_, stops)) = self.watchers.remove(&path.to_string()) {
            for (_, stop) in stops {
                let _ = stop.try_send(());
            }
        }
    }

    async fn dump(&self, format: DumpFormat) -> Result<String> {
        let root = match self.get(&self.pather, &GetOptions::recursive()).await {
            Ok(node) => node,
            Err(VolpluginError::NotExists(key)) => Node {
                key,
                dir: true,
                ..Default::default()
            },
            Err(e) => return Err(e),
        };

        match format {
            DumpFormat::Json => Ok(serde_json::to_string_pretty(&root)?),
            DumpFormat::Yaml => serde_yaml::to_string(&root)
                .map_err(|e| VolpluginError::Internal(format!("yaml dump failed: {}", e))),
        }
    }

    fn path(&self) -> &PathBuilder {
        &self.pather
    }
}
