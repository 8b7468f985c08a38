//! Per-directory name index.
//!
//! A B+ tree built bottom-up from a directory's children. Leaves are runs of
//! a single sorted item array, so ordered enumeration walks that array while
//! lookups and resume points descend through the branch levels.
//!
//! Names collate the way the volume format does: case-insensitive over
//! upper-cased UTF-16 code units, case-preserving in what is returned.

use thiserror::Error;

use crate::namespace::EntryRef;

/// Longest name, in UTF-16 code units.
pub const MAX_NAME_LEN: usize = 255;

/// Default number of items per leaf and children per branch.
pub const DEFAULT_FANOUT: usize = 16;

const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Directory index errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Name breaks the naming rules.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Well-formed name with no entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Two children collate equal.
    #[error("duplicate name: {0}")]
    DuplicateName(String),
}

/// Check a single path component against the naming rules.
pub fn validate_name(name: &str) -> Result<(), IndexError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.encode_utf16().count() > MAX_NAME_LEN
        || name
            .chars()
            .any(|c| (c as u32) < 0x20 || FORBIDDEN_CHARS.contains(&c));
    if invalid {
        Err(IndexError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Collation key: UTF-16 units, each upper-cased when it maps to a single unit.
pub fn collation_key(name: &str) -> Vec<u16> {
    name.encode_utf16().map(upcase_unit).collect()
}

fn upcase_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        // lone surrogate half
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if (u as u32) <= 0xFFFF => u as u32 as u16,
        _ => unit,
    }
}

#[derive(Debug, Clone)]
struct IndexItem {
    key: Vec<u16>,
    name: String,
    entry: EntryRef,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf { end: usize },
    Branch { children: Vec<usize> },
}

#[derive(Debug, Clone)]
struct Node {
    /// Index of the node's smallest item.
    first: usize,
    kind: NodeKind,
}

/// Immutable ordered index of one directory's children.
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    items: Vec<IndexItem>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl DirectoryIndex {
    /// Build from a directory's children. Fan-out below 2 is raised to 2.
    pub fn build(
        children: impl IntoIterator<Item = (String, EntryRef)>,
        fanout: usize,
    ) -> Result<Self, IndexError> {
        let fanout = fanout.max(2);

        let mut items: Vec<IndexItem> = children
            .into_iter()
            .map(|(name, entry)| IndexItem {
                key: collation_key(&name),
                name,
                entry,
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));

        if let Some(pair) = items.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(IndexError::DuplicateName(pair[1].name.clone()));
        }

        let mut nodes = Vec::new();
        let mut level: Vec<usize> = (0..items.len())
            .step_by(fanout)
            .map(|first| {
                nodes.push(Node {
                    first,
                    kind: NodeKind::Leaf {
                        end: (first + fanout).min(items.len()),
                    },
                });
                nodes.len() - 1
            })
            .collect();

        while level.len() > 1 {
            level = level
                .chunks(fanout)
                .map(|group| {
                    let first = nodes[group[0]].first;
                    nodes.push(Node {
                        first,
                        kind: NodeKind::Branch {
                            children: group.to_vec(),
                        },
                    });
                    nodes.len() - 1
                })
                .collect();
        }

        Ok(Self {
            root: level.first().copied(),
            items,
            nodes,
        })
    }

    /// An index with no children.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Levels from root to leaf; 0 for an empty index.
    pub fn depth(&self) -> usize {
        let Some(mut node) = self.root else {
            return 0;
        };
        let mut depth = 1;
        while let NodeKind::Branch { children } = &self.nodes[node].kind {
            node = children[0];
            depth += 1;
        }
        depth
    }

    /// Find a child by name.
    pub fn lookup(&self, name: &str) -> Result<EntryRef, IndexError> {
        validate_name(name)?;
        let key = collation_key(name);
        let not_found = || IndexError::NotFound(name.to_string());

        let leaf = self.descend(&key).ok_or_else(not_found)?;
        let (first, end) = self.leaf_range(leaf);
        self.items[first..end]
            .binary_search_by(|item| item.key.as_slice().cmp(&key))
            .map(|pos| self.items[first + pos].entry)
            .map_err(|_| not_found())
    }

    /// All children in collation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, EntryRef)> + '_ {
        self.items.iter().map(|item| (item.name.as_str(), item.entry))
    }

    /// Children that collate strictly after `name`, in order.
    ///
    /// `name` need not be present, or even valid.
    pub fn seek_after(&self, name: &str) -> impl Iterator<Item = (&str, EntryRef)> + '_ {
        let key = collation_key(name);
        let start = match self.descend(&key) {
            Some(leaf) => {
                let (first, end) = self.leaf_range(leaf);
                let within = self.items[first..end]
                    .partition_point(|item| item.key.as_slice() <= key.as_slice());
                first + within
            }
            None => 0,
        };
        self.items[start..]
            .iter()
            .map(|item| (item.name.as_str(), item.entry))
    }

    /// The leaf whose key range could hold `key`.
    fn descend(&self, key: &[u16]) -> Option<usize> {
        let mut node = self.root?;
        loop {
            match &self.nodes[node].kind {
                NodeKind::Leaf { .. } => return Some(node),
                NodeKind::Branch { children } => {
                    let pos = children.partition_point(|child| {
                        self.items[self.nodes[*child].first].key.as_slice() <= key
                    });
                    node = children[pos.saturating_sub(1)];
                }
            }
        }
    }

    fn leaf_range(&self, leaf: usize) -> (usize, usize) {
        match self.nodes[leaf].kind {
            NodeKind::Leaf { end } => (self.nodes[leaf].first, end),
            NodeKind::Branch { .. } => (self.nodes[leaf].first, self.nodes[leaf].first),
        }
    }
}
