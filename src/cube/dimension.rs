use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt::{self, Display},
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use crate::cube::{CubeError, Result, bone::Bone};

/// One node of a dimension arena. Derived sequences are filled once at build time.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) label: Arc<str>,
    pub(crate) weight: f64,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    /// Exclusive end of this node's pre-order subtree (descendants are `idx..subtree_end`)
    pub(crate) subtree_end: usize,
    /// Self first, root last
    pub(crate) ancestors: Box<[usize]>,
    pub(crate) leaves: Box<[usize]>,
    /// Hash of (dimension name, label path from the root), consistent with `Bone` equality
    pub(crate) path_hash: u64,
}

/// Flat, pre-ordered storage of every node of one dimension
#[derive(Debug)]
pub(crate) struct Arena {
    pub(crate) name: Arc<str>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) roots: Vec<usize>,
    pub(crate) leaves: Vec<usize>,
    pub(crate) by_label: HashMap<Arc<str>, Vec<usize>>,
}

impl Arena {
    /// Lay out a forest given, per entry, its label, weight and parent entry.
    ///
    /// Entries not reachable from a root (parent cycles) make the layout fail
    /// with `None`; the caller turns that into a proper error.
    fn layout(name: Arc<str>, entries: &[(Arc<str>, f64, Option<usize>)]) -> Option<Self> {
        let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        let mut root_entries = Vec::new();
        for (i, (_, _, parent)) in entries.iter().enumerate() {
            match parent {
                Some(p) => children_of[*p].push(i),
                None => root_entries.push(i),
            }
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(entries.len());
        let mut roots = Vec::with_capacity(root_entries.len());

        // (entry, arena index of parent)
        let mut stack: Vec<(usize, Option<usize>)> =
            root_entries.iter().rev().map(|&e| (e, None)).collect();

        while let Some((entry, parent)) = stack.pop() {
            let idx = nodes.len();
            let (label, weight, _) = &entries[entry];

            let (ancestors, path_hash) = match parent {
                Some(p) => {
                    let parent_node: &Node = &nodes[p];
                    let mut chain = Vec::with_capacity(parent_node.ancestors.len() + 1);
                    chain.push(idx);
                    chain.extend_from_slice(&parent_node.ancestors);
                    (chain, path_hash(parent_node.path_hash, label))
                }
                None => (vec![idx], path_hash(seed_hash(&name), label)),
            };

            nodes.push(Node {
                label: Arc::clone(label),
                weight: *weight,
                parent,
                children: Vec::new(),
                subtree_end: idx + 1,
                ancestors: ancestors.into_boxed_slice(),
                leaves: Box::new([]),
                path_hash,
            });

            match parent {
                Some(p) => nodes[p].children.push(idx),
                None => roots.push(idx),
            }

            for &child in children_of[entry].iter().rev() {
                stack.push((child, Some(idx)));
            }
        }

        if nodes.len() != entries.len() {
            return None;
        }

        // Reverse pre-order visits every child before its parent
        for idx in (0..nodes.len()).rev() {
            let children = nodes[idx].children.clone();
            if children.is_empty() {
                nodes[idx].leaves = Box::new([idx]);
                continue;
            }
            let mut leaves = Vec::new();
            let mut end = idx + 1;
            for child in children {
                leaves.extend_from_slice(&nodes[child].leaves);
                end = end.max(nodes[child].subtree_end);
            }
            nodes[idx].leaves = leaves.into_boxed_slice();
            nodes[idx].subtree_end = end;
        }

        let leaves = (0..nodes.len())
            .filter(|&i| nodes[i].children.is_empty())
            .collect();

        let mut by_label: HashMap<Arc<str>, Vec<usize>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            by_label.entry(Arc::clone(&node.label)).or_default().push(idx);
        }

        Some(Arena {
            name,
            nodes,
            roots,
            leaves,
            by_label,
        })
    }

    pub(crate) fn single(name: Arc<str>, label: Arc<str>, weight: f64) -> Self {
        let mut by_label = HashMap::new();
        by_label.insert(Arc::clone(&label), vec![0]);
        let path_hash = path_hash(seed_hash(&name), &label);
        Arena {
            name,
            nodes: vec![Node {
                label,
                weight,
                parent: None,
                children: Vec::new(),
                subtree_end: 1,
                ancestors: Box::new([0]),
                leaves: Box::new([0]),
                path_hash,
            }],
            roots: vec![0],
            leaves: vec![0],
            by_label,
        }
    }
}

fn seed_hash(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

fn path_hash(parent: u64, label: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    parent.hash(&mut hasher);
    label.hash(&mut hasher);
    hasher.finish()
}

/// A node declaring its parent
#[derive(Debug, Clone, PartialEq)]
pub struct ParentLink<K> {
    pub key: K,
    pub parent: Option<K>,
    pub label: String,
    /// Contribution to the parent, 1.0 when absent
    pub weight: Option<f64>,
}

impl<K> ParentLink<K> {
    pub fn new(key: K, parent: Option<K>, label: impl Into<String>) -> Self {
        Self {
            key,
            parent,
            label: label.into(),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A node declaring one of its children. Several records may share a key.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildLink<K> {
    pub key: K,
    pub child: Option<K>,
    pub label: String,
    pub weight: Option<f64>,
}

impl<K> ChildLink<K> {
    pub fn new(key: K, child: Option<K>, label: impl Into<String>) -> Self {
        Self {
            key,
            child,
            label: label.into(),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A node declaring all of its children at once
#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenLink<K> {
    pub key: K,
    pub children: Vec<K>,
    pub label: String,
    pub weight: Option<f64>,
}

impl<K> ChildrenLink<K> {
    pub fn new(key: K, children: Vec<K>, label: impl Into<String>) -> Self {
        Self {
            key,
            children,
            label: label.into(),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A named forest of hierarchy nodes, immutable once built.
///
/// Cloning is cheap: clones share the same node arena.
#[derive(Clone)]
pub struct Dimension {
    arena: Arc<Arena>,
}

impl Dimension {
    /// Dimension with no nodes at all
    pub fn empty(name: &str) -> Result<Self> {
        Self::from_parent_links::<String>(name, std::iter::empty())
    }

    /// Build from caller-defined records, mapping each one to a [`ParentLink`]
    pub fn build<R, K, F>(name: &str, records: impl IntoIterator<Item = R>, selector: F) -> Result<Self>
    where
        K: Eq + Hash + Clone + Display,
        F: Fn(R) -> ParentLink<K>,
    {
        Self::from_parent_links(name, records.into_iter().map(selector))
    }

    /// Build from parent references.
    ///
    /// Parent keys that are never declared become implicit roots labelled with
    /// the key's string form. Repeated identical records are merged; a key
    /// declared twice with a different label, parent or weight, and any parent
    /// cycle, fail with [`CubeError::InvalidKeySelector`].
    pub fn from_parent_links<K>(
        name: &str,
        links: impl IntoIterator<Item = ParentLink<K>>,
    ) -> Result<Self>
    where
        K: Eq + Hash + Clone + Display,
    {
        if name.trim().is_empty() {
            return Err(CubeError::InvalidCoordinate(
                "dimension name must not be blank".into(),
            ));
        }
        let key_error = |reason: String| CubeError::InvalidKeySelector {
            dimension: name.to_string(),
            reason,
        };

        let mut index: HashMap<K, usize> = HashMap::new();
        let mut records: Vec<ParentLink<K>> = Vec::new();

        for link in links {
            match index.get(&link.key) {
                Some(&existing) => {
                    let prev = &records[existing];
                    if prev.parent != link.parent
                        || prev.label != link.label
                        || prev.weight.unwrap_or(1.0) != link.weight.unwrap_or(1.0)
                    {
                        return Err(key_error(format!(
                            "key '{}' is declared more than once with different definitions",
                            link.key
                        )));
                    }
                }
                None => {
                    index.insert(link.key.clone(), records.len());
                    records.push(link);
                }
            }
        }

        // Implicit roots for referenced but undeclared parents
        let declared = records.len();
        for i in 0..declared {
            if let Some(parent) = records[i].parent.clone()
                && !index.contains_key(&parent)
            {
                index.insert(parent.clone(), records.len());
                let label = parent.to_string();
                records.push(ParentLink::new(parent, None, label));
            }
        }

        let entries: Vec<(Arc<str>, f64, Option<usize>)> = records
            .iter()
            .map(|r| {
                (
                    Arc::from(r.label.as_str()),
                    r.weight.unwrap_or(1.0),
                    r.parent.as_ref().map(|p| index[p]),
                )
            })
            .collect();

        let reachable = reachable_from_roots(&entries);
        if reachable.len() != entries.len() {
            let cyclic: Vec<String> = records
                .iter()
                .enumerate()
                .filter(|(i, _)| !reachable.contains(i))
                .map(|(_, r)| r.key.to_string())
                .collect();
            return Err(key_error(format!(
                "parent cycle through keys [{}]",
                cyclic.join(", ")
            )));
        }

        let entries = merge_siblings(&entries).map_err(|(kept, merged)| {
            key_error(format!(
                "keys '{}' and '{}' share label '{}' under one parent with different weights",
                records[kept].key, records[merged].key, records[merged].label
            ))
        })?;
        if entries.len() < records.len() {
            tracing::debug!(
                dimension = name,
                merged = records.len() - entries.len(),
                "Merged siblings sharing a label"
            );
        }

        let arena = Arena::layout(Arc::from(name), &entries)
            .ok_or_else(|| key_error("parent cycle".to_string()))?;

        tracing::debug!(
            dimension = name,
            nodes = arena.nodes.len(),
            roots = arena.roots.len(),
            "Built dimension"
        );

        Ok(Dimension {
            arena: Arc::new(arena),
        })
    }

    /// Build from single-child references, grouping records by key first
    pub fn from_child_links<K>(
        name: &str,
        links: impl IntoIterator<Item = ChildLink<K>>,
    ) -> Result<Self>
    where
        K: Eq + Hash + Clone + Display,
    {
        let mut index: HashMap<K, usize> = HashMap::new();
        let mut groups: Vec<ChildrenLink<K>> = Vec::new();

        for link in links {
            match index.get(&link.key) {
                Some(&existing) => {
                    let group = &mut groups[existing];
                    if group.label != link.label
                        || group.weight.unwrap_or(1.0) != link.weight.unwrap_or(1.0)
                    {
                        return Err(CubeError::InvalidKeySelector {
                            dimension: name.to_string(),
                            reason: format!(
                                "key '{}' is declared with different labels or weights",
                                link.key
                            ),
                        });
                    }
                    if let Some(child) = link.child
                        && !group.children.contains(&child)
                    {
                        group.children.push(child);
                    }
                }
                None => {
                    index.insert(link.key.clone(), groups.len());
                    groups.push(ChildrenLink {
                        key: link.key,
                        children: link.child.into_iter().collect(),
                        label: link.label,
                        weight: link.weight,
                    });
                }
            }
        }

        Self::from_children_links(name, groups)
    }

    /// Build from multi-child references, normalised into parent references.
    ///
    /// Child keys without a record of their own become leaves labelled with
    /// the key's string form. A child claimed by two different parents fails
    /// with [`CubeError::InvalidKeySelector`].
    pub fn from_children_links<K>(
        name: &str,
        links: impl IntoIterator<Item = ChildrenLink<K>>,
    ) -> Result<Self>
    where
        K: Eq + Hash + Clone + Display,
    {
        let key_error = |reason: String| CubeError::InvalidKeySelector {
            dimension: name.to_string(),
            reason,
        };

        let mut index: HashMap<K, usize> = HashMap::new();
        let mut groups: Vec<ChildrenLink<K>> = Vec::new();
        for link in links {
            match index.get(&link.key) {
                Some(&existing) => {
                    let group = &mut groups[existing];
                    if group.label != link.label
                        || group.weight.unwrap_or(1.0) != link.weight.unwrap_or(1.0)
                    {
                        return Err(key_error(format!(
                            "key '{}' is declared with different labels or weights",
                            link.key
                        )));
                    }
                    for child in link.children {
                        if !group.children.contains(&child) {
                            group.children.push(child);
                        }
                    }
                }
                None => {
                    index.insert(link.key.clone(), groups.len());
                    groups.push(link);
                }
            }
        }

        let mut parent_of: HashMap<K, K> = HashMap::new();
        let mut implicit_leaves: Vec<K> = Vec::new();
        for group in &groups {
            for child in &group.children {
                match parent_of.get(child) {
                    Some(parent) if *parent != group.key => {
                        return Err(key_error(format!(
                            "child '{}' is claimed by both '{}' and '{}'",
                            child, parent, group.key
                        )));
                    }
                    Some(_) => {}
                    None => {
                        parent_of.insert(child.clone(), group.key.clone());
                        if !index.contains_key(child) {
                            implicit_leaves.push(child.clone());
                        }
                    }
                }
            }
        }

        let declared = groups.into_iter().map(|g| ParentLink {
            parent: parent_of.get(&g.key).cloned(),
            key: g.key,
            label: g.label,
            weight: g.weight,
        });
        let synthesized: Vec<ParentLink<K>> = implicit_leaves
            .into_iter()
            .map(|k| {
                let label = k.to_string();
                ParentLink {
                    parent: parent_of.get(&k).cloned(),
                    key: k,
                    label,
                    weight: None,
                }
            })
            .collect();

        Self::from_parent_links(name, declared.chain(synthesized))
    }

    pub fn name(&self) -> &str {
        &self.arena.name
    }

    /// Number of nodes in the whole forest
    pub fn len(&self) -> usize {
        self.arena.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.nodes.is_empty()
    }

    pub fn roots(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        self.arena
            .roots
            .iter()
            .map(|&i| Bone::new(Arc::clone(&self.arena), i))
    }

    /// Every node, pre-order, root by root
    pub fn nodes(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        (0..self.arena.nodes.len()).map(|i| Bone::new(Arc::clone(&self.arena), i))
    }

    pub fn leaves(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        self.arena
            .leaves
            .iter()
            .map(|&i| Bone::new(Arc::clone(&self.arena), i))
    }

    /// First node (pre-order) carrying `label`
    pub fn find(&self, label: &str) -> Option<Bone> {
        self.arena
            .by_label
            .get(label)
            .and_then(|idx| idx.first())
            .map(|&i| Bone::new(Arc::clone(&self.arena), i))
    }

    pub fn find_all(&self, label: &str) -> Vec<Bone> {
        self.arena
            .by_label
            .get(label)
            .map(|idx| {
                idx.iter()
                    .map(|&i| Bone::new(Arc::clone(&self.arena), i))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn label_occurrences(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.arena
            .by_label
            .iter()
            .map(|(label, idx)| (label.as_ref(), idx.as_slice()))
    }

    pub(crate) fn bone_at(&self, idx: usize) -> Bone {
        Bone::new(Arc::clone(&self.arena), idx)
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dimension")
            .field("name", &self.arena.name)
            .field("nodes", &self.arena.nodes.len())
            .field("roots", &self.arena.roots.len())
            .finish()
    }
}

/// Fold siblings (or roots) sharing a label into the first of them; the
/// children of every folded entry are appended to the survivor's.
///
/// Entries must all be reachable from a root. On a weight conflict the
/// offending pair of entry indices is returned.
fn merge_siblings(
    entries: &[(Arc<str>, f64, Option<usize>)],
) -> std::result::Result<Vec<(Arc<str>, f64, Option<usize>)>, (usize, usize)> {
    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, (_, _, parent)) in entries.iter().enumerate() {
        match parent {
            Some(p) => children_of[*p].push(i),
            None => queue.push_back(i),
        }
    }

    let mut merged: Vec<(Arc<str>, f64, Option<usize>)> = Vec::with_capacity(entries.len());
    let mut origin: Vec<usize> = Vec::with_capacity(entries.len());
    let mut target: Vec<Option<usize>> = vec![None; entries.len()];
    let mut by_slot: HashMap<(Option<usize>, Arc<str>), usize> = HashMap::new();

    // Breadth-first, so a parent is always placed before its children
    while let Some(entry) = queue.pop_front() {
        let (label, weight, parent) = &entries[entry];
        let parent = parent.and_then(|p| target[p]);
        match by_slot.get(&(parent, Arc::clone(label))) {
            Some(&slot) => {
                if merged[slot].1 != *weight {
                    return Err((origin[slot], entry));
                }
                target[entry] = Some(slot);
            }
            None => {
                let slot = merged.len();
                merged.push((Arc::clone(label), *weight, parent));
                origin.push(entry);
                by_slot.insert((parent, Arc::clone(label)), slot);
                target[entry] = Some(slot);
            }
        }
        queue.extend(children_of[entry].iter().copied());
    }
    Ok(merged)
}

fn reachable_from_roots(entries: &[(Arc<str>, f64, Option<usize>)]) -> HashSet<usize> {
    let mut reachable = HashSet::new();
    for start in 0..entries.len() {
        let mut path = Vec::new();
        let mut current = Some(start);
        let mut seen = HashSet::new();
        while let Some(i) = current {
            if reachable.contains(&i) {
                break;
            }
            if !seen.insert(i) {
                path.clear();
                break;
            }
            path.push(i);
            current = entries[i].2;
            if current.is_none() {
                break;
            }
        }
        if current.is_none() || current.is_some_and(|i| reachable.contains(&i)) {
            reachable.extend(path);
        }
    }
    reachable
}
