use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::cube::{
    CubeError, Result,
    dimension::{Arena, Node},
};

/// A single labelled node of one dimension's hierarchy.
///
/// A bone is a cheap handle (shared arena + index). Equality is structural:
/// same dimension name, same label, and equal parent chains up to the root,
/// so bones taken from two separately built copies of a hierarchy compare equal.
#[derive(Clone)]
pub struct Bone {
    arena: Arc<Arena>,
    idx: usize,
}

impl Bone {
    pub(crate) fn new(arena: Arc<Arena>, idx: usize) -> Self {
        Bone { arena, idx }
    }

    /// A root-less, child-less bone that belongs to no built dimension
    pub fn detached(dimension_name: &str, label: &str) -> Result<Self> {
        Self::detached_weighted(dimension_name, label, 1.0)
    }

    pub fn detached_weighted(dimension_name: &str, label: &str, weight: f64) -> Result<Self> {
        if dimension_name.trim().is_empty() {
            return Err(CubeError::InvalidCoordinate(format!(
                "bone '{label}' has a blank dimension name"
            )));
        }
        let arena = Arena::single(Arc::from(dimension_name), Arc::from(label), weight);
        Ok(Bone::new(Arc::new(arena), 0))
    }

    #[inline]
    fn node(&self) -> &Node {
        &self.arena.nodes[self.idx]
    }

    #[inline]
    fn at(&self, idx: usize) -> Bone {
        Bone::new(Arc::clone(&self.arena), idx)
    }

    /// Position inside the owning arena (pre-order)
    pub(crate) fn index(&self) -> usize {
        self.idx
    }

    pub fn dimension_name(&self) -> &str {
        &self.arena.name
    }

    pub fn label(&self) -> &str {
        &self.node().label
    }

    /// Contribution multiplier relative to the parent
    pub fn weight(&self) -> f64 {
        self.node().weight
    }

    pub fn parent(&self) -> Option<Bone> {
        self.node().parent.map(|p| self.at(p))
    }

    pub fn children(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        self.node().children.iter().map(|&c| self.at(c))
    }

    pub fn is_leaf(&self) -> bool {
        self.node().children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.node().parent.is_none()
    }

    /// Distance to the root (a root has depth 0)
    pub fn depth(&self) -> usize {
        self.node().ancestors.len() - 1
    }

    /// Self followed by every descendant, pre-order
    pub fn descendants(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        (self.idx..self.node().subtree_end).map(|i| self.at(i))
    }

    pub fn descendant_count(&self) -> usize {
        self.node().subtree_end - self.idx - 1
    }

    /// Self followed by every ancestor up to the root
    pub fn ancestors(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        self.node().ancestors.iter().map(|&i| self.at(i))
    }

    pub fn ancestor_count(&self) -> usize {
        self.node().ancestors.len()
    }

    /// Labels from the root down to this bone
    pub fn label_path(&self) -> Vec<Arc<str>> {
        self.node()
            .ancestors
            .iter()
            .rev()
            .map(|&i| Arc::clone(&self.arena.nodes[i].label))
            .collect()
    }

    /// Leaves under this bone (the bone itself when it is a leaf)
    pub fn leaves(&self) -> impl ExactSizeIterator<Item = Bone> + '_ {
        self.node().leaves.iter().map(|&i| self.at(i))
    }

    /// True when `ancestor` is this bone or lies on its parent chain
    pub fn is_descendant_of(&self, ancestor: &Bone) -> bool {
        if Arc::ptr_eq(&self.arena, &ancestor.arena) {
            return self.node().ancestors.contains(&ancestor.idx);
        }
        self.ancestors().any(|a| a == *ancestor)
    }

    /// Product of the weights along the path from this bone up to `ancestor`.
    ///
    /// 1.0 when `ancestor == self`; fails when `ancestor` is not on the parent chain.
    pub fn resulting_weight(&self, ancestor: &Bone) -> Result<f64> {
        let mut weight = 1.0;
        for bone in self.ancestors() {
            if bone == *ancestor {
                return Ok(weight);
            }
            weight *= bone.weight();
        }
        Err(CubeError::NotAnAncestor {
            dimension: self.dimension_name().to_string(),
            descendant: self.label().to_string(),
            ancestor: ancestor.label().to_string(),
        })
    }

    /// Same dimension and label, but no parent and no children
    pub fn strip_hierarchy(&self) -> Bone {
        let arena = Arena::single(
            Arc::clone(&self.arena.name),
            Arc::clone(&self.node().label),
            self.weight(),
        );
        Bone::new(Arc::new(arena), 0)
    }

    fn same_path(&self, other: &Bone) -> bool {
        let mine = &self.node().ancestors;
        let theirs = &other.node().ancestors;
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|(&a, &b)| self.arena.nodes[a].label == other.arena.nodes[b].label)
    }
}

impl PartialEq for Bone {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.arena, &other.arena) {
            return self.idx == other.idx;
        }
        self.node().path_hash == other.node().path_hash
            && self.arena.name == other.arena.name
            && self.same_path(other)
    }
}

impl Eq for Bone {}

impl Hash for Bone {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node().path_hash.hash(state);
    }
}

impl fmt::Debug for Bone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dimension_name(), self.label())
    }
}

impl fmt::Display for Bone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dimension_name(), self.label())
    }
}
