//! Key-value store client contract.
//!
//! Everything above this layer (use-lock publication, global configuration)
//! talks to the coordination store only through [`Client`]. Implementations
//! must provide linearizable reads and writes with compare-and-swap and
//! TTL-expiring keys; the lock protocol adds no ordering of its own.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;

use volplugin_common::{Result, StopHandle, VolpluginError};

use crate::pather::PathBuilder;

// ============================================================================
// Options
// ============================================================================

/// Existence precondition for a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExistPolicy {
    /// Write regardless of the current state.
    #[default]
    Ignore,
    /// The key must already exist.
    Exist,
    /// The key must not exist.
    NoExist,
    /// The key must exist and hold `SetOptions::value`.
    Value,
}

/// Options for [`Client::get`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub recursive: bool,
    pub sort: bool,
}

impl GetOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            sort: true,
        }
    }
}

/// Options for [`Client::set`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub exist: ExistPolicy,
    /// Expected current value. Checked for every policy except `NoExist`.
    pub value: Option<Vec<u8>>,
    /// Create a directory instead of a value key.
    pub dir: bool,
    pub ttl: Option<Duration>,
}

impl SetOptions {
    /// Create only; fail with `Exists` if the key is present.
    pub fn no_exist() -> Self {
        Self {
            exist: ExistPolicy::NoExist,
            ..Default::default()
        }
    }

    /// Overwrite only if the key exists and still holds `value`.
    pub fn exist_with_value(value: impl Into<Vec<u8>>) -> Self {
        Self {
            exist: ExistPolicy::Exist,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Compare-and-swap against `value`.
    pub fn compare_value(value: impl Into<Vec<u8>>) -> Self {
        Self {
            exist: ExistPolicy::Value,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn directory() -> Self {
        Self {
            dir: true,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Options for [`Client::delete`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub dir: bool,
    pub recursive: bool,
    /// Compare-and-delete: only remove the key if it holds this value.
    pub value: Option<Vec<u8>>,
}

impl DeleteOptions {
    pub fn compare_value(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn recursive() -> Self {
        Self {
            dir: true,
            recursive: true,
            value: None,
        }
    }
}

// ============================================================================
// Node
// ============================================================================

/// Snapshot of a key, or of a directory and its children.
///
/// Deletions delivered through a watch carry the deleted key with an empty
/// value and no children.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    pub key: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,
    #[serde(serialize_with = "serialize_lossy", skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
}

fn serialize_lossy<S: Serializer>(value: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(value))
}

impl Node {
    pub fn leaf(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }

    /// Depth-first search of this subtree for `key`.
    pub fn find(&self, key: &str) -> Option<&Node> {
        if self.key == key {
            return Some(self);
        }

        self.nodes.iter().find_map(|node| node.find(key))
    }

    /// Every value-carrying node in this subtree, in tree order.
    pub fn leaves(&self) -> Vec<&Node> {
        if !self.dir {
            return vec![self];
        }

        self.nodes.iter().flat_map(|node| node.leaves()).collect()
    }
}

// ============================================================================
// Watch and dump types
// ============================================================================

/// Channel a watch forwards (possibly transformed) nodes on.
pub type Notifier = mpsc::UnboundedSender<Node>;

/// Invoked for every change under a watched path. Errors are sent to the
/// watch's error channel and do not end the watch.
pub type WatchHandler = Arc<dyn Fn(Node, &Notifier) -> Result<()> + Send + Sync>;

/// Handler that forwards every node unchanged.
pub fn forward_handler() -> WatchHandler {
    Arc::new(|node, notify| {
        notify
            .send(node)
            .map_err(|_| VolpluginError::Internal("watch receiver closed".to_string()))
    })
}

/// Serialization used by [`Client::dump`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DumpFormat {
    #[default]
    Json,
    Yaml,
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpFormat::Json => write!(f, "json"),
            DumpFormat::Yaml => write!(f, "yaml"),
        }
    }
}

impl FromStr for DumpFormat {
    type Err = VolpluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(DumpFormat::Json),
            "yaml" | "yml" => Ok(DumpFormat::Yaml),
            other => Err(VolpluginError::Config(format!(
                "unknown dump format: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Capabilities the lock protocol needs from a coordination store.
///
/// Paths are full paths, normally derived from [`Client::path`].
#[async_trait]
pub trait Client: Send + Sync {
    /// Read a key or directory. Missing keys fail with `NotExists`.
    async fn get(&self, path: &PathBuilder, opts: &GetOptions) -> Result<Node>;

    /// Write a key, honoring the existence precondition and TTL in `opts`.
    async fn set(&self, path: &PathBuilder, value: &[u8], opts: &SetOptions) -> Result<()>;

    async fn delete(&self, path: &PathBuilder, opts: &DeleteOptions) -> Result<()>;

    /// Watch `path` (and its subtree when `recursive`), passing each change
    /// through `handler`. The returned handle stops the watch; handler and
    /// transport errors arrive on the receiver.
    fn watch(
        &self,
        path: &PathBuilder,
        notify: Notifier,
        recursive: bool,
        handler: WatchHandler,
    ) -> (StopHandle, mpsc::UnboundedReceiver<VolpluginError>);

    /// Stop every watch registered on `path`.
    fn watch_stop(&self, path: &PathBuilder);

    /// Serialize the client's whole namespace.
    async fn dump(&self, format: DumpFormat) -> Result<String>;

    /// Root builder of this client's namespace.
    fn path(&self) -> &PathBuilder;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Node {
        Node {
            key: "/volplugin".to_string(),
            dir: true,
            value: Vec::new(),
            nodes: vec![
                Node::leaf("/volplugin/global-config", "{}"),
                Node {
                    key: "/volplugin/users".to_string(),
                    dir: true,
                    value: Vec::new(),
                    nodes: vec![Node::leaf("/volplugin/users/mount", "held")],
                },
            ],
        }
    }

    #[test]
    fn test_set_options_helpers() {
        let opts = SetOptions::no_exist().with_ttl(Duration::from_secs(3));
        assert_eq!(opts.exist, ExistPolicy::NoExist);
        assert_eq!(opts.ttl, Some(Duration::from_secs(3)));
        assert!(opts.value.is_none());

        let opts = SetOptions::exist_with_value("abc");
        assert_eq!(opts.exist, ExistPolicy::Exist);
        assert_eq!(opts.value.as_deref(), Some(&b"abc"[..]));

        assert_eq!(SetOptions::default().exist, ExistPolicy::Ignore);
    }

    #[test]
    fn test_node_find() {
        let root = tree();

        let found = root.find("/volplugin/users/mount").unwrap();
        assert_eq!(found.value_str(), "held");
        assert!(root.find("/volplugin/users").unwrap().dir);
        assert!(root.find("/volplugin/missing").is_none());

        let leaves: Vec<&str> = root.leaves().iter().map(|n| n.key.as_str()).collect();
        assert_eq!(
            leaves,
            vec!["/volplugin/global-config", "/volplugin/users/mount"]
        );
    }

    #[test]
    fn test_node_serialize() {
        let json = serde_json::to_value(Node::leaf("/a", "value")).unwrap();
        assert_eq!(json, serde_json::json!({"key": "/a", "value": "value"}));

        let json = serde_json::to_value(tree()).unwrap();
        assert_eq!(json["dir"], true);
        assert_eq!(json["nodes"][1]["nodes"][0]["value"], "held");
    }

    #[test]
    fn test_dump_format_parse() {
        assert_eq!("JSON".parse::<DumpFormat>().unwrap(), DumpFormat::Json);
        assert_eq!("yml".parse::<DumpFormat>().unwrap(), DumpFormat::Yaml);
        assert!("toml".parse::<DumpFormat>().is_err());
        assert_eq!(DumpFormat::Yaml.to_string(), "yaml");
    }

    #[test]
    fn test_forward_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = forward_handler();

        handler(Node::leaf("/k", "v"), &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap().key, "/k");

        drop(rx);
        assert!(handler(Node::leaf("/k", "v"), &tx).is_err());
    }
}
