use std::{
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
};

use crate::{
    cube::{CubeError, Result, bone::Bone, dimension::Dimension, measure::WeightedAggregator},
    helpers::cartesian::{Cartesian, checked_product},
};

/// One cell of the cube: exactly one bone per participating dimension.
///
/// Bones are kept sorted by dimension name, so two skeletons built from the
/// same bones in any order are equal and hash alike.
#[derive(Clone, PartialEq, Eq)]
pub struct Skeleton {
    bones: Arc<[Bone]>,
}

impl Skeleton {
    /// Fails with [`CubeError::InvalidCoordinate`] on a blank or repeated dimension name
    pub fn new(bones: impl IntoIterator<Item = Bone>) -> Result<Self> {
        let mut bones: Vec<Bone> = bones.into_iter().collect();
        bones.sort_by(|a, b| a.dimension_name().cmp(b.dimension_name()));

        if let Some(blank) = bones.iter().find(|b| b.dimension_name().trim().is_empty()) {
            return Err(CubeError::InvalidCoordinate(format!(
                "bone '{}' has a blank dimension name",
                blank.label()
            )));
        }
        if let Some(pair) = bones
            .windows(2)
            .find(|w| w[0].dimension_name() == w[1].dimension_name())
        {
            return Err(CubeError::InvalidCoordinate(format!(
                "dimension '{}' appears more than once",
                pair[0].dimension_name()
            )));
        }

        Ok(Skeleton {
            bones: bones.into(),
        })
    }

    /// Skeleton with no dimension at all
    pub fn empty() -> Self {
        Skeleton {
            bones: Arc::from(Vec::new()),
        }
    }

    // Caller guarantees the canonical ordering and uniqueness
    fn from_sorted(bones: Vec<Bone>) -> Self {
        Skeleton {
            bones: bones.into(),
        }
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn dimension_names(&self) -> impl ExactSizeIterator<Item = &str> {
        self.bones.iter().map(Bone::dimension_name)
    }

    pub fn bone(&self, dimension_name: &str) -> Option<&Bone> {
        self.position(dimension_name).map(|i| &self.bones[i])
    }

    fn position(&self, dimension_name: &str) -> Option<usize> {
        self.bones
            .binary_search_by(|b| b.dimension_name().cmp(dimension_name))
            .ok()
    }

    pub fn has_same_dimensions(&self, other: &Skeleton) -> bool {
        self.len() == other.len()
            && self
                .bones
                .iter()
                .zip(other.bones.iter())
                .all(|(a, b)| a.dimension_name() == b.dimension_name())
    }

    /// All bones are leaves
    pub fn is_leaf(&self) -> bool {
        self.bones.iter().all(Bone::is_leaf)
    }

    /// All bones are roots
    pub fn is_root(&self) -> bool {
        self.bones.iter().all(Bone::is_root)
    }

    pub fn add(&self, bone: Bone) -> Result<Self> {
        Self::new(self.bones.iter().cloned().chain(std::iter::once(bone)))
    }

    pub fn concat(&self, other: &Skeleton) -> Result<Self> {
        Self::new(self.bones.iter().chain(other.bones.iter()).cloned())
    }

    /// Keep only the named dimensions
    pub fn extract<S: AsRef<str>>(&self, dimension_names: &[S]) -> Self {
        Self::from_sorted(
            self.bones
                .iter()
                .filter(|b| dimension_names.iter().any(|n| n.as_ref() == b.dimension_name()))
                .cloned()
                .collect(),
        )
    }

    /// Drop the named dimensions
    pub fn except<S: AsRef<str>>(&self, dimension_names: &[S]) -> Self {
        Self::from_sorted(
            self.bones
                .iter()
                .filter(|b| !dimension_names.iter().any(|n| n.as_ref() == b.dimension_name()))
                .cloned()
                .collect(),
        )
    }

    /// Swap the bone of `bone`'s dimension, which must already be present
    pub fn replace(&self, bone: Bone) -> Result<Self> {
        let pos = self
            .position(bone.dimension_name())
            .ok_or_else(|| CubeError::MissingDimension(vec![bone.dimension_name().to_string()]))?;
        let mut bones = self.bones.to_vec();
        bones[pos] = bone;
        Ok(Self::from_sorted(bones))
    }

    /// Re-attach hierarchy: look the current label of `dimension`'s bone up in `dimension`
    pub fn update(&self, dimension: &Dimension) -> Result<Self> {
        let current = self
            .bone(dimension.name())
            .ok_or_else(|| CubeError::MissingDimension(vec![dimension.name().to_string()]))?;
        let resolved = dimension
            .find(current.label())
            .ok_or_else(|| CubeError::MissingValue {
                label: current.label().to_string(),
                dimension: dimension.name().to_string(),
            })?;
        self.replace(resolved)
    }

    /// Replace every bone by its root-less, child-less copy
    pub fn strip_hierarchy(&self) -> Self {
        Self::from_sorted(self.bones.iter().map(Bone::strip_hierarchy).collect())
    }

    /// Every coordinate reachable by lifting bones to their ancestors, self first
    pub fn ancestors(&self) -> Result<impl ExactSizeIterator<Item = Skeleton> + use<>> {
        let chains: Vec<Vec<Bone>> = self.bones.iter().map(|b| b.ancestors().collect()).collect();
        Ok(Cartesian::owned(chains)?.map(Skeleton::from_sorted))
    }

    pub fn ancestor_count(&self) -> Result<usize> {
        Ok(checked_product(self.bones.iter().map(Bone::ancestor_count))?)
    }

    /// Every leaf coordinate under this one
    pub fn leaves(&self) -> Result<impl ExactSizeIterator<Item = Skeleton> + use<>> {
        let sets: Vec<Vec<Bone>> = self.bones.iter().map(|b| b.leaves().collect()).collect();
        Ok(Cartesian::owned(sets)?.map(Skeleton::from_sorted))
    }

    /// True when every bone of `ancestor` is an ancestor-or-self of the matching bone here
    pub fn is_descendant_of(&self, ancestor: &Skeleton) -> bool {
        self.has_same_dimensions(ancestor)
            && self
                .bones
                .iter()
                .zip(ancestor.bones.iter())
                .all(|(b, a)| b.is_descendant_of(a))
    }

    /// Product, over dimensions, of each bone's weight toward the matching ancestor bone.
    ///
    /// `ancestor` must cover exactly the dimensions of `self`.
    pub fn resulting_weight(&self, ancestor: &Skeleton) -> Result<f64> {
        if !self.has_same_dimensions(ancestor) {
            return Err(CubeError::DimensionMismatch {
                expected: self.dimension_names().collect::<Vec<_>>().join(", "),
                found: ancestor.dimension_names().collect::<Vec<_>>().join(", "),
            });
        }
        self.bones
            .iter()
            .zip(ancestor.bones.iter())
            .try_fold(1.0, |acc, (b, a)| Ok(acc * b.resulting_weight(a)?))
    }

    /// Every coordinate combining one selected node per dimension
    pub fn combine(
        dimensions: &[Dimension],
        selection: NodeSelection,
    ) -> Result<impl ExactSizeIterator<Item = Skeleton> + use<>> {
        let mut names = HashSet::new();
        for dim in dimensions {
            if !names.insert(dim.name()) {
                return Err(CubeError::InvalidCoordinate(format!(
                    "dimension '{}' appears more than once",
                    dim.name()
                )));
            }
        }

        let mut ordered: Vec<&Dimension> = dimensions.iter().collect();
        ordered.sort_by(|a, b| a.name().cmp(b.name()));
        let sets: Vec<Vec<Bone>> = ordered
            .into_iter()
            .map(|dim| match selection {
                NodeSelection::All => dim.nodes().collect(),
                NodeSelection::Leaves => dim.leaves().collect(),
                NodeSelection::Roots => dim.roots().collect(),
            })
            .collect();
        Ok(Cartesian::owned(sets)?.map(Skeleton::from_sorted))
    }

    /// Total order used for result sets: the display form first, then each
    /// bone's label path from its root, which tells apart coordinates that
    /// only share a display form (same label under different parents).
    pub(crate) fn sort_key(&self) -> (String, Vec<Vec<Arc<str>>>) {
        let paths = self.bones.iter().map(Bone::label_path).collect();
        (self.to_string(), paths)
    }
}

/// Which nodes of each dimension [`Skeleton::combine`] draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelection {
    All,
    Leaves,
    Roots,
}

impl Hash for Skeleton {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for bone in self.bones.iter() {
            bone.hash(state);
        }
    }
}

impl fmt::Debug for Skeleton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Skeleton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, bone) in self.bones.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{bone}")?;
        }
        write!(f, ")")
    }
}

/// A coordinate paired with an optional measure value
#[derive(Debug, Clone, PartialEq)]
pub struct ValuedSkeleton<T> {
    pub skeleton: Skeleton,
    pub value: Option<T>,
}

impl<T> ValuedSkeleton<T> {
    pub fn new(skeleton: Skeleton, value: T) -> Self {
        Self {
            skeleton,
            value: Some(value),
        }
    }

    pub fn without_value(skeleton: Skeleton) -> Self {
        Self {
            skeleton,
            value: None,
        }
    }
}

/// A target coordinate together with every weighted observation composing it.
///
/// The final value is computed on first access and cached; concurrent first
/// accesses converge on a single stored value.
pub struct SkeletonsAccumulator<T> {
    skeleton: Skeleton,
    contributors: Vec<(f64, Arc<ValuedSkeleton<T>>)>,
    aggregator: Arc<dyn WeightedAggregator<T>>,
    value: OnceLock<Option<T>>,
}

impl<T> SkeletonsAccumulator<T> {
    pub fn new(
        skeleton: Skeleton,
        contributors: Vec<(f64, Arc<ValuedSkeleton<T>>)>,
        aggregator: Arc<dyn WeightedAggregator<T>>,
    ) -> Self {
        Self {
            skeleton,
            contributors,
            aggregator,
            value: OnceLock::new(),
        }
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn contributors(&self) -> &[(f64, Arc<ValuedSkeleton<T>>)] {
        &self.contributors
    }

    /// Aggregated value, or `None` when no contributor carries a value
    pub fn value(&self) -> Option<&T> {
        self.value
            .get_or_init(|| {
                let contributions: Vec<(f64, &T)> = self
                    .contributors
                    .iter()
                    .filter_map(|(w, obs)| obs.value.as_ref().map(|v| (*w, v)))
                    .collect();
                if contributions.is_empty() {
                    None
                } else {
                    Some(self.aggregator.aggregate(&contributions))
                }
            })
            .as_ref()
    }

    pub(crate) fn with_skeleton(self, skeleton: Skeleton) -> Self {
        Self { skeleton, ..self }
    }
}

impl<T: Clone> SkeletonsAccumulator<T> {
    pub fn to_valued(&self) -> ValuedSkeleton<T> {
        ValuedSkeleton {
            skeleton: self.skeleton.clone(),
            value: self.value().cloned(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SkeletonsAccumulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkeletonsAccumulator")
            .field("skeleton", &self.skeleton)
            .field("contributors", &self.contributors.len())
            .field("value", &self.value.get())
            .finish()
    }
}
