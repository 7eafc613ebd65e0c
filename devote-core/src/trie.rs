//! Authenticated key-value maps
//!
//! [`AuthenticatedMap`] is the contract the consensus state is written
//! against. [`MerkleMap`] implements it as a Merkle Patricia trie over the
//! nibbles of each key. Nodes are immutable and shared through `Arc`: an
//! update copies only the path from the root down to the changed entry, every
//! node carries its own hash, and cloning a map costs one reference count.
//!
//! Each node is stored in the map's [`Table`] under its hash. A commit writes
//! only the nodes created since the last commit; untouched subtrees are
//! shared with every earlier root, which stays readable.

use crate::crypto::keccak256_concat;
use crate::{Hash, Result, Table, TrieError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const LEAF_TAG: &[u8] = &[0x00];
const EXTENSION_TAG: &[u8] = &[0x01];
const BRANCH_TAG: &[u8] = &[0x02];

/// Fan-out of a branch node, one slot per nibble
const RADIX: usize = 16;

/// Borrowed `(key, value)` pairs in ascending key order
pub type Entries<'a> = Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a>;

/// A versioned, content-addressed key-value map
pub trait AuthenticatedMap {
    /// Read the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite `key`
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; fails with [`TrieError::NotFound`] when it is absent
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Lazily iterate every entry whose key starts with `prefix`
    fn iter_prefix<'a>(&'a self, prefix: &'a [u8]) -> Entries<'a>;

    /// Whether any key starts with `prefix`
    fn has_prefix(&self, prefix: &[u8]) -> bool {
        self.iter_prefix(prefix).next().is_some()
    }

    /// Root over the current contents, including uncommitted changes
    fn root(&self) -> Hash;

    /// Persist the current contents and return their root
    fn commit(&mut self) -> Result<Hash>;
}

/// Merkle-rooted map over a namespaced table
#[derive(Clone)]
pub struct MerkleMap {
    table: Table,
    root: Option<Arc<Node>>,
    committed_root: Hash,
}

impl MerkleMap {
    /// An empty map, rooted at [`Hash::ZERO`]
    pub fn empty(table: Table) -> Self {
        Self {
            table,
            root: None,
            committed_root: Hash::ZERO,
        }
    }

    /// Reopen the map committed under `root`
    ///
    /// The zero root always opens an empty map. Any other root must have been
    /// committed to this table, and every node read back must hash to the
    /// hash it is stored under.
    pub fn open(root: Hash, table: Table) -> Result<Self> {
        if root.is_zero() {
            return Ok(Self::empty(table));
        }

        let node = load(&table, root, &mut Vec::new())?;
        Ok(Self {
            table,
            root: Some(node),
            committed_root: root,
        })
    }

    /// Root of the last committed (or opened) state
    pub fn committed_root(&self) -> Hash {
        self.committed_root
    }

    /// Whether there are uncommitted changes
    pub fn is_dirty(&self) -> bool {
        self.root() != self.committed_root
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.iter_prefix(&[]).count()
    }

    /// Whether the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The table this map commits to
    pub fn table(&self) -> &Table {
        &self.table
    }
}

impl fmt::Debug for MerkleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleMap")
            .field("table", &self.table)
            .field("root", &self.root())
            .field("committed_root", &self.committed_root)
            .finish()
    }
}

impl AuthenticatedMap for MerkleMap {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .root
            .as_deref()
            .and_then(|root| lookup(root, &to_nibbles(key)))
            .map(|entry| entry.value.clone()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.get(key)?.as_deref() == Some(value) {
            return Ok(());
        }

        let entry = Entry {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.root = insert(self.root.as_ref(), &to_nibbles(key), entry);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let replaced = self
            .root
            .as_ref()
            .and_then(|root| remove(root, &to_nibbles(key)))
            .ok_or_else(|| TrieError::NotFound(hex::encode(key)))?;
        self.root = replaced;
        Ok(())
    }

    fn iter_prefix<'a>(&'a self, prefix: &'a [u8]) -> Entries<'a> {
        let start = self
            .root
            .as_deref()
            .and_then(|root| subtree(root, &to_nibbles(prefix)));
        Box::new(EntryIter {
            stack: start.into_iter().collect(),
        })
    }

    fn root(&self) -> Hash {
        self.root.as_ref().map_or(Hash::ZERO, |node| node.hash)
    }

    fn commit(&mut self) -> Result<Hash> {
        let root = self.root();
        if root == self.committed_root {
            return Ok(root);
        }

        let written = match &self.root {
            Some(node) => persist(&self.table, node)?,
            None => 0,
        };

        debug!(
            "Committed {} at root {}, wrote {} node bytes",
            String::from_utf8_lossy(self.table.namespace()),
            root,
            written
        );

        self.committed_root = root;
        Ok(root)
    }
}

/// A key and its value
#[derive(Debug, Clone)]
struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Entry {
    fn as_pair(&self) -> (&[u8], &[u8]) {
        (&self.key, &self.value)
    }
}

type Children = [Option<Arc<Node>>; RADIX];

#[derive(Debug)]
enum NodeKind {
    /// Remaining nibbles of a single key
    Leaf { path: Vec<u8>, entry: Entry },
    /// Nibbles shared by every key below, always followed by a branch
    Extension { path: Vec<u8>, child: Arc<Node> },
    /// Fan-out on the next nibble; `entry` is the key that ends here
    Branch {
        children: Box<Children>,
        entry: Option<Entry>,
    },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    hash: Hash,
    /// Set once the node is known to be in the table
    persisted: AtomicBool,
}

/// Table form of a node; keys are rebuilt from the path on load
#[derive(Serialize, Deserialize)]
enum StoredNode {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Hash,
    },
    Branch {
        children: Vec<(u8, Hash)>,
        value: Option<Vec<u8>>,
    },
}

impl NodeKind {
    fn hash(&self) -> Hash {
        match self {
            NodeKind::Leaf { path, entry } => keccak256_concat([
                LEAF_TAG,
                length_prefix(path).as_slice(),
                path.as_slice(),
                entry.value.as_slice(),
            ]),
            NodeKind::Extension { path, child } => keccak256_concat([
                EXTENSION_TAG,
                length_prefix(path).as_slice(),
                path.as_slice(),
                child.hash.as_bytes(),
            ]),
            NodeKind::Branch { children, entry } => {
                let bitmap = occupied(children)
                    .fold(0u16, |bits, (nibble, _)| bits | (1 << nibble))
                    .to_be_bytes();
                let mut parts: Vec<&[u8]> = vec![BRANCH_TAG, bitmap.as_slice()];
                parts.extend(occupied(children).map(|(_, child)| child.hash.as_bytes()));
                match entry {
                    Some(entry) => {
                        parts.push(&[1]);
                        parts.push(&entry.value);
                    }
                    None => parts.push(&[0]),
                }
                keccak256_concat(parts)
            }
        }
    }

    fn stored(&self) -> StoredNode {
        match self {
            NodeKind::Leaf { path, entry } => StoredNode::Leaf {
                path: path.clone(),
                value: entry.value.clone(),
            },
            NodeKind::Extension { path, child } => StoredNode::Extension {
                path: path.clone(),
                child: child.hash,
            },
            NodeKind::Branch { children, entry } => StoredNode::Branch {
                children: occupied(children)
                    .map(|(nibble, child)| (nibble, child.hash))
                    .collect(),
                value: entry.as_ref().map(|entry| entry.value.clone()),
            },
        }
    }
}

impl Node {
    fn new(kind: NodeKind) -> Arc<Self> {
        let hash = kind.hash();
        Arc::new(Self {
            kind,
            hash,
            persisted: AtomicBool::new(false),
        })
    }

    fn leaf(path: Vec<u8>, entry: Entry) -> Arc<Self> {
        Self::new(NodeKind::Leaf { path, entry })
    }

    /// Canonical node for a branch's contents
    ///
    /// An empty branch is no node, a lone entry becomes a leaf and a lone
    /// child absorbs the branch's nibble.
    fn branch(mut children: Children, entry: Option<Entry>) -> Option<Arc<Self>> {
        let (first, single) = {
            let mut nibbles = occupied(&children).map(|(nibble, _)| nibble);
            let first = nibbles.next();
            (first, nibbles.next().is_none())
        };

        match (first, entry) {
            (None, None) => None,
            (None, Some(entry)) => Some(Self::leaf(Vec::new(), entry)),
            (Some(nibble), None) if single => {
                let child = children[usize::from(nibble)].take()?;
                Some(Self::prefixed(vec![nibble], child))
            }
            (_, entry) => Some(Self::new(NodeKind::Branch {
                children: Box::new(children),
                entry,
            })),
        }
    }

    /// `node` reached through `prefix` further nibbles
    fn prefixed(mut prefix: Vec<u8>, node: Arc<Self>) -> Arc<Self> {
        if prefix.is_empty() {
            return node;
        }

        let kind = match &node.kind {
            NodeKind::Leaf { path, entry } => {
                prefix.extend_from_slice(path);
                NodeKind::Leaf {
                    path: prefix,
                    entry: entry.clone(),
                }
            }
            NodeKind::Extension { path, child } => {
                prefix.extend_from_slice(path);
                NodeKind::Extension {
                    path: prefix,
                    child: Arc::clone(child),
                }
            }
            NodeKind::Branch { .. } => NodeKind::Extension {
                path: prefix,
                child: Arc::clone(&node),
            },
        };
        Self::new(kind)
    }
}

/// Occupied slots of a branch, in nibble order
fn occupied(children: &Children) -> impl Iterator<Item = (u8, &Arc<Node>)> {
    (0u8..)
        .zip(children.iter())
        .filter_map(|(nibble, child)| child.as_ref().map(|child| (nibble, child)))
}

/// Branch (behind `prefix`) over the given children and entry
fn fork(prefix: &[u8], children: Children, entry: Option<Entry>) -> Option<Arc<Node>> {
    Node::branch(children, entry).map(|node| Node::prefixed(prefix.to_vec(), node))
}

/// Place `entry` at the end of `nibbles` into a branch being assembled
fn place(children: &mut Children, here: &mut Option<Entry>, nibbles: &[u8], entry: Entry) {
    match nibbles.split_first() {
        Some((nibble, rest)) => {
            children[usize::from(*nibble)] = Some(Node::leaf(rest.to_vec(), entry));
        }
        None => *here = Some(entry),
    }
}

fn insert(node: Option<&Arc<Node>>, path: &[u8], entry: Entry) -> Option<Arc<Node>> {
    let Some(node) = node else {
        return Some(Node::leaf(path.to_vec(), entry));
    };

    match &node.kind {
        NodeKind::Leaf {
            path: existing,
            entry: current,
        } => {
            if existing.as_slice() == path {
                return Some(Node::leaf(path.to_vec(), entry));
            }
            let common = common_prefix(existing, path);
            let mut children = Children::default();
            let mut here = None;
            place(&mut children, &mut here, &existing[common..], current.clone());
            place(&mut children, &mut here, &path[common..], entry);
            fork(&path[..common], children, here)
        }
        NodeKind::Extension {
            path: shared,
            child,
        } => {
            let common = common_prefix(shared, path);
            if common == shared.len() {
                return insert(Some(child), &path[common..], entry)
                    .map(|node| Node::prefixed(shared.clone(), node));
            }
            let mut children = Children::default();
            let mut here = None;
            children[usize::from(shared[common])] = Some(Node::prefixed(
                shared[common + 1..].to_vec(),
                Arc::clone(child),
            ));
            place(&mut children, &mut here, &path[common..], entry);
            fork(&path[..common], children, here)
        }
        NodeKind::Branch {
            children,
            entry: current,
        } => {
            let mut children: Children = (**children).clone();
            let mut here = current.clone();
            match path.split_first() {
                Some((nibble, rest)) => {
                    let slot = &mut children[usize::from(*nibble)];
                    *slot = insert(slot.as_ref(), rest, entry);
                }
                None => here = Some(entry),
            }
            Node::branch(children, here)
        }
    }
}

/// `None` when `path` is absent, otherwise the subtree replacing `node`
fn remove(node: &Arc<Node>, path: &[u8]) -> Option<Option<Arc<Node>>> {
    match &node.kind {
        NodeKind::Leaf { path: existing, .. } => (existing.as_slice() == path).then_some(None),
        NodeKind::Extension {
            path: shared,
            child,
        } => {
            let rest = path.strip_prefix(shared.as_slice())?;
            let replaced = remove(child, rest)?;
            Some(replaced.map(|node| Node::prefixed(shared.clone(), node)))
        }
        NodeKind::Branch { children, entry } => {
            let mut children: Children = (**children).clone();
            let mut here = entry.clone();
            match path.split_first() {
                Some((nibble, rest)) => {
                    let slot = &mut children[usize::from(*nibble)];
                    let replaced = remove(slot.as_ref()?, rest)?;
                    *slot = replaced;
                }
                None => {
                    here.take()?;
                }
            }
            Some(Node::branch(children, here))
        }
    }
}

fn lookup<'a>(mut node: &'a Node, mut path: &[u8]) -> Option<&'a Entry> {
    loop {
        match &node.kind {
            NodeKind::Leaf {
                path: existing,
                entry,
            } => return (existing.as_slice() == path).then_some(entry),
            NodeKind::Extension {
                path: shared,
                child,
            } => {
                path = path.strip_prefix(shared.as_slice())?;
                node = &**child;
            }
            NodeKind::Branch { children, entry } => match path.split_first() {
                None => return entry.as_ref(),
                Some((nibble, rest)) => {
                    node = children[usize::from(*nibble)].as_deref()?;
                    path = rest;
                }
            },
        }
    }
}

/// Smallest subtree holding every key that starts with `path`
fn subtree<'a>(mut node: &'a Node, mut path: &[u8]) -> Option<&'a Node> {
    loop {
        if path.is_empty() {
            return Some(node);
        }
        match &node.kind {
            NodeKind::Leaf { path: existing, .. } => {
                return existing.starts_with(path).then_some(node);
            }
            NodeKind::Extension {
                path: shared,
                child,
            } => {
                if shared.starts_with(path) {
                    return Some(node);
                }
                path = path.strip_prefix(shared.as_slice())?;
                node = &**child;
            }
            NodeKind::Branch { children, .. } => {
                let (nibble, rest) = path.split_first()?;
                node = children[usize::from(*nibble)].as_deref()?;
                path = rest;
            }
        }
    }
}

/// Depth-first walk; a branch's own entry sorts before its children
struct EntryIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match &node.kind {
                NodeKind::Leaf { entry, .. } => return Some(entry.as_pair()),
                NodeKind::Extension { child, .. } => self.stack.push(&**child),
                NodeKind::Branch { children, entry } => {
                    self.stack
                        .extend(children.iter().rev().flatten().map(|child| &**child));
                    if let Some(entry) = entry {
                        return Some(entry.as_pair());
                    }
                }
            }
        }
        None
    }
}

/// Write `node` and every not yet persisted node below it; returns bytes written
fn persist(table: &Table, node: &Node) -> Result<usize> {
    if node.persisted.load(Ordering::Acquire) {
        return Ok(0);
    }

    let mut written = 0;
    match &node.kind {
        NodeKind::Leaf { .. } => {}
        NodeKind::Extension { child, .. } => written += persist(table, child)?,
        NodeKind::Branch { children, .. } => {
            for child in children.iter().flatten() {
                written += persist(table, child)?;
            }
        }
    }

    let bytes = bincode::serialize(&node.kind.stored())?;
    table.put(node.hash.as_bytes(), &bytes)?;
    node.persisted.store(true, Ordering::Release);
    Ok(written + bytes.len())
}

/// Read the subtree stored under `hash`; `prefix` holds the nibbles above it
fn load(table: &Table, hash: Hash, prefix: &mut Vec<u8>) -> Result<Arc<Node>> {
    let bytes = table
        .get(hash.as_bytes())?
        .ok_or(TrieError::MissingRoot(hash))?;

    let stored: StoredNode = bincode::deserialize(&bytes)?;
    let kind = match stored {
        StoredNode::Leaf { path, value } => NodeKind::Leaf {
            entry: Entry {
                key: key_from_nibbles(prefix, &path)?,
                value,
            },
            path,
        },
        StoredNode::Extension { path, child } => {
            let depth = prefix.len();
            prefix.extend_from_slice(&path);
            let child = load(table, child, prefix);
            prefix.truncate(depth);
            NodeKind::Extension {
                path,
                child: child?,
            }
        }
        StoredNode::Branch {
            children: stored,
            value,
        } => {
            let mut children = Children::default();
            for (nibble, child) in stored {
                let slot = children
                    .get_mut(usize::from(nibble))
                    .ok_or_else(|| TrieError::Encoding(format!("branch nibble {} out of range", nibble)))?;
                prefix.push(nibble);
                let loaded = load(table, child, prefix);
                prefix.pop();
                *slot = Some(loaded?);
            }
            let entry = match value {
                Some(value) => Some(Entry {
                    key: key_from_nibbles(prefix, &[])?,
                    value,
                }),
                None => None,
            };
            NodeKind::Branch {
                children: Box::new(children),
                entry,
            }
        }
    };

    let actual = kind.hash();
    if actual != hash {
        return Err(TrieError::Corrupted {
            expected: hash,
            actual,
        });
    }

    Ok(Arc::new(Node {
        kind,
        hash,
        persisted: AtomicBool::new(true),
    }))
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|byte| [byte >> 4, byte & 0x0f]).collect()
}

fn key_from_nibbles(prefix: &[u8], rest: &[u8]) -> Result<Vec<u8>> {
    let nibbles: Vec<u8> = prefix.iter().chain(rest).copied().collect();
    if nibbles.len() % 2 != 0 || nibbles.iter().any(|nibble| *nibble >= 16) {
        return Err(TrieError::Encoding("malformed node path".to_string()));
    }
    Ok(nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}

fn length_prefix(path: &[u8]) -> [u8; 8] {
    (path.len() as u64).to_be_bytes()
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
