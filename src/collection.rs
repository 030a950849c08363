use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::ANNOTATION_TITLE;
use crate::descriptor::Descriptor;
use crate::digest::Digest;

/// One descriptor stored in a collection, keyed by its digest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Digest,
    pub media_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Node {
    pub fn id(&self) -> String {
        self.id.to_string()
    }

    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }
}

impl From<&Descriptor> for Node {
    fn from(desc: &Descriptor) -> Self {
        Self {
            id: desc.digest.clone(),
            media_type: desc.media_type.clone(),
            size: desc.size,
            annotations: desc.annotations.clone(),
        }
    }
}

/// Deduplicated set of nodes discovered while resolving manifest trees.
///
/// Interior locking lets concurrent loader branches insert through a shared
/// reference while other callers enumerate.
#[derive(Debug, Default)]
pub struct Collection {
    name: String,
    nodes: RwLock<HashMap<Digest, Node>>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a node for `desc` unless its digest is already present.
    /// Returns whether a node was added.
    pub fn add_node(&self, desc: &Descriptor) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&desc.digest) {
            return false;
        }
        nodes.insert(desc.digest.clone(), Node::from(desc));
        true
    }

    /// Snapshot of every stored node, in no particular order
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn node(&self, digest: &Digest) -> Option<Node> {
        self.nodes.read().get(digest).cloned()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.nodes.read().contains_key(digest)
    }

    /// Stored digests, sorted
    pub fn digests(&self) -> Vec<Digest> {
        let mut digests: Vec<Digest> = self.nodes.read().keys().cloned().collect();
        digests.sort();
        digests
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_collection_is_empty() {
        let collection = Collection::new("test");
        assert_eq!(collection.name(), "test");
        assert!(collection.is_empty());
        assert!(collection.nodes().is_empty());
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let collection = Collection::new("test");
        let desc = Descriptor::for_bytes("application/json", b"{}")
            .with_annotation(ANNOTATION_TITLE, "test.json");

        assert!(collection.add_node(&desc));
        assert!(!collection.add_node(&desc));
        assert_eq!(collection.len(), 1);

        let node = collection.node(&desc.digest).unwrap();
        assert_eq!(node.id(), desc.digest.to_string());
        assert_eq!(node.title(), Some("test.json"));
        assert_eq!(node.size, 2);
    }

    #[test]
    fn test_first_insert_wins() {
        let collection = Collection::new("test");
        let first = Descriptor::for_bytes("application/json", b"{}");
        let mut second = first.clone();
        second.media_type = "text/plain".to_string();

        collection.add_node(&first);
        collection.add_node(&second);

        assert_eq!(
            collection.node(&first.digest).unwrap().media_type,
            "application/json"
        );
    }

    #[test]
    fn test_concurrent_inserts_do_not_duplicate() {
        let collection = std::sync::Arc::new(Collection::new("shared"));
        let descs: Vec<Descriptor> = (0..50)
            .map(|i| Descriptor::for_bytes("text/plain", format!("blob {}", i).as_bytes()))
            .collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collection = collection.clone();
                let descs = descs.clone();
                std::thread::spawn(move || {
                    descs.iter().filter(|d| collection.add_node(d)).count()
                })
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, 50);
        assert_eq!(collection.len(), 50);
        assert_eq!(collection.digests().len(), 50);
    }
}
