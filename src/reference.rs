//! Study / series / instance reference tree.
//!
//! A tree is an ordered list of nodes, each either a leaf identifier or a
//! branch carrying children. A leaf means "everything below this level".

use std::fmt;
use std::iter;
use std::slice;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Study, series, instance.
pub const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceNode {
    id: String,
    children: Option<Vec<ReferenceNode>>,
}

impl ReferenceNode {
    fn leaf(id: &str) -> Self {
        Self {
            id: id.to_string(),
            children: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn children(&self) -> &[ReferenceNode] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Turns a leaf into a branch in place and returns its children.
    fn promote(&mut self) -> &mut Vec<ReferenceNode> {
        self.children.get_or_insert_with(Vec::new)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTree {
    nodes: Vec<ReferenceNode>,
}

impl ReferenceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single path tree, the common case of one study/series/instance.
    pub fn from_path(study: &str, series: Option<&str>, instance: Option<&str>) -> Self {
        let mut tree = Self::new();
        tree.insert_path(study, series, instance);
        tree
    }

    pub fn nodes(&self) -> &[ReferenceNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a path of up to three identifiers, left to right.
    ///
    /// Missing or empty identifiers stop the walk at that level, so
    /// `[Some(study), None, Some(instance)]` selects the whole study.
    /// Returns `false` when the walk stopped on such an identifier.
    pub fn insert(&mut self, ids: &[Option<&str>]) -> bool {
        let ids = &ids[..ids.len().min(MAX_DEPTH)];
        insert_values(&mut self.nodes, ids)
    }

    pub fn insert_path(
        &mut self,
        study: &str,
        series: Option<&str>,
        instance: Option<&str>,
    ) -> bool {
        self.insert(&[Some(study), series, instance])
    }

    /// Depth first walk over every maximal path, in insertion order.
    pub fn paths(&self) -> Paths<'_> {
        Paths {
            stack: vec![self.nodes.iter()],
            prefix: Vec::with_capacity(MAX_DEPTH),
        }
    }

    /// Rebuilds the tree keeping only identifiers accepted by `keep`. A
    /// rejected identifier cuts its path at that level, the same way
    /// [`insert`](Self::insert) treats a missing one.
    pub fn filtered<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&str) -> bool,
    {
        let mut tree = Self::new();
        for path in self.paths() {
            let ids: Vec<Option<&str>> = path.ids().map(|id| keep(id).then_some(id)).collect();
            tree.insert(&ids);
        }
        tree
    }

    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(ReferencePath<'_>),
    {
        for path in self.paths() {
            visit(path);
        }
    }
}

fn insert_values(list: &mut Vec<ReferenceNode>, ids: &[Option<&str>]) -> bool {
    let Some((first, rest)) = ids.split_first() else {
        return true;
    };
    let Some(id) = first.filter(|id| !id.is_empty()) else {
        return false;
    };

    let index = match list.iter().position(|node| node.id == id) {
        Some(index) => index,
        None => {
            list.push(ReferenceNode::leaf(id));
            list.len() - 1
        }
    };

    if rest.is_empty() {
        return true;
    }
    insert_values(list[index].promote(), rest)
}

/// One maximal path of a [`ReferenceTree`]. Levels the path does not reach
/// are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferencePath<'a> {
    pub study: Option<&'a str>,
    pub series: Option<&'a str>,
    pub instance: Option<&'a str>,
}

impl<'a> ReferencePath<'a> {
    fn from_parts(prefix: &[&'a str], last: &'a str) -> Self {
        let mut ids = prefix.iter().copied().chain(iter::once(last));
        Self {
            study: ids.next(),
            series: ids.next(),
            instance: ids.next(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &'a str> {
        [self.study, self.series, self.instance]
            .into_iter()
            .map_while(|id| id)
    }
}

pub struct Paths<'a> {
    stack: Vec<slice::Iter<'a, ReferenceNode>>,
    prefix: Vec<&'a str>,
}

impl<'a> Iterator for Paths<'a> {
    type Item = ReferencePath<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(node) = frame.next() else {
                self.stack.pop();
                self.prefix.pop();
                continue;
            };
            match node.children.as_deref() {
                Some(children) if !children.is_empty() => {
                    self.prefix.push(&node.id);
                    self.stack.push(children.iter());
                }
                _ => return Some(ReferencePath::from_parts(&self.prefix, &node.id)),
            }
        }
    }
}

impl fmt::Display for ReferenceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prev: Vec<&str> = Vec::new();
        for path in self.paths() {
            let ids: Vec<&str> = path.ids().collect();
            let shared = ids
                .iter()
                .zip(&prev)
                .take_while(|(current, previous)| current == previous)
                .count();
            for (depth, id) in ids.iter().enumerate().skip(shared) {
                writeln!(f, "{}{id}", "  ".repeat(depth))?;
            }
            prev = ids;
        }
        Ok(())
    }
}

/// JSON form: a string is a leaf, `[id, [children]]` is a branch.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawNode {
    Leaf(String),
    Branch(String, Vec<RawNode>),
}

impl From<&ReferenceNode> for RawNode {
    fn from(node: &ReferenceNode) -> Self {
        match &node.children {
            None => RawNode::Leaf(node.id.clone()),
            Some(children) => {
                RawNode::Branch(node.id.clone(), children.iter().map(RawNode::from).collect())
            }
        }
    }
}

fn insert_raw<'a>(tree: &mut ReferenceTree, prefix: &mut Vec<&'a str>, node: &'a RawNode) {
    match node {
        RawNode::Branch(id, children) if !children.is_empty() => {
            prefix.push(id);
            for child in children {
                insert_raw(tree, prefix, child);
            }
            prefix.pop();
        }
        RawNode::Leaf(id) | RawNode::Branch(id, _) => {
            let ids: Vec<Option<&str>> = prefix
                .iter()
                .copied()
                .chain(iter::once(id.as_str()))
                .map(Some)
                .collect();
            tree.insert(&ids);
        }
    }
}

impl Serialize for ReferenceTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: Vec<RawNode> = self.nodes.iter().map(RawNode::from).collect();
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReferenceTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<RawNode>::deserialize(deserializer)?;
        let mut tree = ReferenceTree::new();
        let mut prefix = Vec::with_capacity(MAX_DEPTH);
        for node in &raw {
            insert_raw(&mut tree, &mut prefix, node);
        }
        Ok(tree)
    }
}
