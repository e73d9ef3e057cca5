use std::{
    any::Any,
    collections::{HashMap, HashSet},
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::cube::{
    CubeError, Result,
    bone::Bone,
    config::AggregationConfig,
    measure::{
        CommutativeAggregator, GroupAggregator, MergesWith, Scale, Scaled, WeightedAggregator,
    },
    result::{AggregationResult, describe_chain},
    skeleton::{Skeleton, SkeletonsAccumulator, ValuedSkeleton},
};

type Shared<T> = Arc<ValuedSkeleton<T>>;

/// Aggregation engine over base observations.
///
/// Two strategies are offered:
///
/// - [`aggregate`](Self::aggregate): exhaustive ancestor closure. Every
///   observation contributes to every coordinate in its ancestor set; one
///   result per distinct ancestor coordinate.
/// - [`aggregate_targets`](Self::aggregate_targets): target-driven recursive
///   partition. Only the requested coordinates are computed, narrowing the
///   candidate observations dimension by dimension.
///
/// Both entry points are guarded: they never return an error or unwind. Any
/// failure, including a panic inside a user-supplied aggregator, is reported
/// as [`Status::Error`](crate::cube::Status::Error) with the full cause chain
/// in the message.
///
/// Observations sharing a coordinate are always collapsed first with the
/// group aggregator.
///
/// # Example
///
/// ```rust
/// # use hiercube::cube::{CubeAggregator, Dimension, ParentLink, Skeleton, Sum, ValuedSkeleton};
/// let geo = Dimension::from_parent_links(
///     "geo",
///     vec![ParentLink::new("eu", None, "Europe"), ParentLink::new("fr", Some("eu"), "France")],
/// )
/// .unwrap();
/// let france = Skeleton::new([geo.find("France").unwrap()]).unwrap();
/// let obs = vec![ValuedSkeleton::new(france, 3.0)];
///
/// let result = CubeAggregator::new(Sum, Sum).aggregate(&obs);
/// assert!(result.is_ok());
/// assert_eq!(result.results().len(), 2);
/// ```
pub struct CubeAggregator<T, G, W> {
    group: G,
    weighted: Arc<W>,
    config: AggregationConfig,
    simplify: bool,
    _measure: PhantomData<fn() -> T>,
}

impl<T, G> CubeAggregator<T, G, Scaled<G>>
where
    T: Scale + Clone + Send + Sync + 'static,
    G: GroupAggregator<T> + Clone + 'static,
{
    /// Engine whose accumulators scale each value by its weight, then reduce
    /// with `group`
    pub fn scaled(group: G) -> Self {
        Self::new(group.clone(), Scaled(group))
    }
}

impl<T, G, W> CubeAggregator<T, G, W>
where
    T: Clone + Send + Sync + 'static,
    G: CommutativeAggregator<T>,
    W: MergesWith<T, G> + 'static,
{
    /// Collapse dimensions that every target shares with a weight-1 bone
    /// before partitioning.
    ///
    /// Only available when the group reducer is commutative and the weighted
    /// reducer gives the same answer on merged contributions:
    ///
    /// ```rust
    /// # use hiercube::cube::{CubeAggregator, Max, Scaled, Sum};
    /// let _ = CubeAggregator::<f64, _, _>::new(Sum, Sum).with_simplification();
    /// let _ = CubeAggregator::<f64, _, _>::new(Max, Scaled(Max)).with_simplification();
    /// ```
    ///
    /// A counting reducer depends on how many contributors it sees and is rejected:
    ///
    /// ```compile_fail
    /// # use hiercube::cube::{Count, CubeAggregator, Sum};
    /// let _ = CubeAggregator::<f64, _, _>::new(Sum, Count).with_simplification();
    /// ```
    pub fn with_simplification(mut self) -> Self {
        self.simplify = true;
        self
    }
}

impl<T, G, W> CubeAggregator<T, G, W>
where
    T: Clone + Send + Sync + 'static,
    G: GroupAggregator<T>,
    W: WeightedAggregator<T> + 'static,
{
    pub fn new(group: G, weighted: W) -> Self {
        Self {
            group,
            weighted: Arc::new(weighted),
            config: AggregationConfig::default(),
            simplify: false,
            _measure: PhantomData,
        }
    }

    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregate every coordinate derivable from the observations
    pub fn aggregate(
        &self,
        observations: &[ValuedSkeleton<T>],
    ) -> AggregationResult<ValuedSkeleton<T>> {
        self.guarded("ancestor closure", || {
            let accumulators = self.accumulate(observations)?;
            Ok(self.materialize(&accumulators))
        })
    }

    /// Like [`Self::aggregate`], keeping each result's weighted contributors
    pub fn aggregate_detailed(
        &self,
        observations: &[ValuedSkeleton<T>],
    ) -> AggregationResult<SkeletonsAccumulator<T>> {
        self.guarded("ancestor closure", || {
            let accumulators = self.accumulate(observations)?;
            self.force(&accumulators);
            Ok(accumulators)
        })
    }

    /// Aggregate only the requested coordinates.
    ///
    /// An empty target set is not an error: nothing runs and the result
    /// carries [`Status::NotRun`](crate::cube::Status::NotRun).
    pub fn aggregate_targets(
        &self,
        observations: &[ValuedSkeleton<T>],
        targets: &[Skeleton],
    ) -> AggregationResult<ValuedSkeleton<T>> {
        if targets.is_empty() {
            return AggregationResult::not_run("No targets supplied: nothing to aggregate");
        }
        self.guarded("targeted partition", || {
            let accumulators = self.accumulate_targets(observations, targets)?;
            Ok(self.materialize(&accumulators))
        })
    }

    /// Like [`Self::aggregate_targets`], keeping each result's weighted contributors
    pub fn aggregate_targets_detailed(
        &self,
        observations: &[ValuedSkeleton<T>],
        targets: &[Skeleton],
    ) -> AggregationResult<SkeletonsAccumulator<T>> {
        if targets.is_empty() {
            return AggregationResult::not_run("No targets supplied: nothing to aggregate");
        }
        self.guarded("targeted partition", || {
            let accumulators = self.accumulate_targets(observations, targets)?;
            self.force(&accumulators);
            Ok(accumulators)
        })
    }

    /// Unguarded ancestor closure; accumulator values stay lazy
    pub fn accumulate(
        &self,
        observations: &[ValuedSkeleton<T>],
    ) -> Result<Vec<SkeletonsAccumulator<T>>> {
        let grouped = self.group_observations(observations);
        tracing::debug!(
            observations = observations.len(),
            distinct = grouped.len(),
            "Starting ancestor-closure aggregation"
        );

        // Contributor positions keep reduction order independent of scheduling
        let contributors: DashMap<Skeleton, Vec<(usize, f64)>> = DashMap::new();
        let visit = |(pos, obs): (usize, &Shared<T>)| -> Result<()> {
            for ancestor in obs.skeleton.ancestors()? {
                let weight = obs.skeleton.resulting_weight(&ancestor)?;
                contributors.entry(ancestor).or_default().push((pos, weight));
            }
            Ok(())
        };
        let visited = if self.config.runs_parallel(grouped.len()) {
            grouped.par_iter().enumerate().try_for_each(visit)
        } else {
            grouped.iter().enumerate().try_for_each(visit)
        };
        visited.map_err(|e| e.during("ancestor closure"))?;

        let weighted = self.weighted_handle();
        let mut accumulators: Vec<SkeletonsAccumulator<T>> = contributors
            .into_iter()
            .map(|(skeleton, mut entries)| {
                entries.sort_unstable_by_key(|(pos, _)| *pos);
                let contributions = entries
                    .into_iter()
                    .map(|(pos, weight)| (weight, Arc::clone(&grouped[pos])))
                    .collect();
                SkeletonsAccumulator::new(skeleton, contributions, Arc::clone(&weighted))
            })
            .collect();
        accumulators.par_sort_by_cached_key(|a| a.skeleton().sort_key());
        Ok(accumulators)
    }

    /// Unguarded targeted partition; accumulator values stay lazy
    pub fn accumulate_targets(
        &self,
        observations: &[ValuedSkeleton<T>],
        targets: &[Skeleton],
    ) -> Result<Vec<SkeletonsAccumulator<T>>> {
        let targets = distinct(targets.iter().cloned());
        let Some(reference) = targets.first().cloned() else {
            return Ok(Vec::new());
        };

        if let Some(odd) = targets.iter().find(|t| !t.has_same_dimensions(&reference)) {
            return Err(mismatch(&reference, odd));
        }
        let mut grouped = self.group_observations(observations);
        if let Some(odd) = grouped
            .iter()
            .find(|o| !o.skeleton.has_same_dimensions(&reference))
        {
            return Err(mismatch(&reference, &odd.skeleton));
        }

        tracing::debug!(
            observations = observations.len(),
            distinct = grouped.len(),
            targets = targets.len(),
            simplify = self.simplify,
            "Starting targeted aggregation"
        );

        if self.config.check_use {
            let before = grouped.len();
            grouped = self.retain_usable(grouped, &targets);
            tracing::debug!(kept = grouped.len(), dropped = before - grouped.len(), "Applied use check");
        }

        let mut accumulators = if self.simplify {
            self.simplify_and_partition(grouped, targets)
                .map_err(|e| e.during("simplification"))?
        } else {
            self.partition(0, targets, grouped)
                .map_err(|e| e.during("partition"))?
        };
        accumulators.par_sort_by_cached_key(|a| a.skeleton().sort_key());
        Ok(accumulators)
    }

    fn guarded<R, F>(&self, strategy: &'static str, run: F) -> AggregationResult<R>
    where
        R: Send,
        F: FnOnce() -> Result<Vec<R>> + Send,
    {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match self.config.num_threads {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()?
                .install(run),
            None => run(),
        }));
        let duration = start.elapsed();

        let error = match outcome {
            Ok(Ok(results)) => {
                tracing::debug!(
                    strategy,
                    results = results.len(),
                    elapsed_ms = duration.as_millis() as u64,
                    "Aggregation finished"
                );
                return AggregationResult::ok(results, duration);
            }
            Ok(Err(err)) => err,
            Err(payload) => CubeError::WorkerPanic(panic_message(payload)),
        };

        let error = match error {
            err @ CubeError::AggregationFailure { .. } => err,
            err => err.during(strategy),
        };
        let message = describe_chain(&error);
        tracing::warn!(strategy, error = %message, "Aggregation failed");
        AggregationResult::failed(message, duration)
    }

    fn weighted_handle(&self) -> Arc<dyn WeightedAggregator<T>> {
        self.weighted.clone()
    }

    /// Collapse observations sharing a coordinate, keeping first-seen order
    fn group_observations<'a>(
        &self,
        observations: impl IntoIterator<Item = &'a ValuedSkeleton<T>>,
    ) -> Vec<Shared<T>>
    where
        T: 'a,
    {
        let mut index: HashMap<&Skeleton, usize> = HashMap::new();
        let mut groups: Vec<(&Skeleton, Vec<T>)> = Vec::new();

        for obs in observations {
            let slot = *index.entry(&obs.skeleton).or_insert_with(|| {
                groups.push((&obs.skeleton, Vec::new()));
                groups.len() - 1
            });
            if let Some(value) = &obs.value {
                groups[slot].1.push(value.clone());
            }
        }

        groups
            .into_iter()
            .map(|(skeleton, values)| {
                let value = (!values.is_empty()).then(|| self.group.reduce(&values));
                Arc::new(ValuedSkeleton {
                    skeleton: skeleton.clone(),
                    value,
                })
            })
            .collect()
    }

    /// Drop observations that lie outside every target in some dimension
    fn retain_usable(&self, observations: Vec<Shared<T>>, targets: &[Skeleton]) -> Vec<Shared<T>> {
        let dims = targets[0].len();
        let reachable: Vec<HashSet<Bone>> = (0..dims)
            .map(|d| {
                let tops: HashSet<&Bone> = targets.iter().map(|t| &t.bones()[d]).collect();
                tops.into_iter().flat_map(|b| b.descendants()).collect()
            })
            .collect();

        let usable = |obs: &Shared<T>| {
            obs.skeleton
                .bones()
                .iter()
                .zip(&reachable)
                .all(|(bone, set)| set.contains(bone))
        };
        if self.config.runs_parallel(observations.len()) {
            observations.into_par_iter().filter(usable).collect()
        } else {
            observations.into_iter().filter(usable).collect()
        }
    }

    /// Split targets by their bone in dimension `depth`, narrow the
    /// observations to that bone's descendants, and recurse.
    fn partition(
        &self,
        depth: usize,
        targets: Vec<Skeleton>,
        observations: Vec<Shared<T>>,
    ) -> Result<Vec<SkeletonsAccumulator<T>>> {
        if observations.is_empty() {
            return Ok(Vec::new());
        }
        let dims = targets.first().map_or(0, Skeleton::len);

        if depth == dims {
            // Targets are distinct, so a fully split group holds exactly one
            let Some(target) = targets.into_iter().next() else {
                return Ok(Vec::new());
            };
            let contributions = observations
                .into_iter()
                .map(|obs| Ok((obs.skeleton.resulting_weight(&target)?, obs)))
                .collect::<Result<Vec<_>>>()?;
            return Ok(vec![SkeletonsAccumulator::new(
                target,
                contributions,
                self.weighted_handle(),
            )]);
        }

        let mut index: HashMap<Bone, usize> = HashMap::new();
        let mut groups: Vec<(Bone, Vec<Skeleton>)> = Vec::new();
        for target in targets {
            let bone = target.bones()[depth].clone();
            match index.get(&bone) {
                Some(&slot) => groups[slot].1.push(target),
                None => {
                    index.insert(bone.clone(), groups.len());
                    groups.push((bone, vec![target]));
                }
            }
        }

        let run_group = |(bone, group_targets): (Bone, Vec<Skeleton>)| {
            let members: HashSet<Bone> = bone.descendants().collect();
            let inside = |obs: &&Shared<T>| members.contains(&obs.skeleton.bones()[depth]);
            let narrowed: Vec<Shared<T>> = if self.config.runs_parallel(observations.len()) {
                observations.par_iter().filter(inside).cloned().collect()
            } else {
                observations.iter().filter(inside).cloned().collect()
            };
            self.partition(depth + 1, group_targets, narrowed)
        };

        let nested: Vec<Vec<SkeletonsAccumulator<T>>> =
            if self.config.runs_parallel(groups.len()) {
                groups
                    .into_par_iter()
                    .map(run_group)
                    .collect::<Result<_>>()?
            } else {
                groups
                    .into_iter()
                    .map(run_group)
                    .collect::<Result<_>>()?
            };
        Ok(nested.into_iter().flatten().collect())
    }

    /// Collapse every unprotected dimension on which all targets share one
    /// bone reached with weight 1, partition the reduced problem, then put
    /// the collapsed bones back on each result.
    fn simplify_and_partition(
        &self,
        observations: Vec<Shared<T>>,
        targets: Vec<Skeleton>,
    ) -> Result<Vec<SkeletonsAccumulator<T>>> {
        let reference = targets[0].clone();
        let mut collapsed: Vec<Bone> = Vec::new();

        for (d, bone) in reference.bones().iter().enumerate() {
            if self.config.is_preserved(bone.dimension_name()) {
                continue;
            }
            if !targets.iter().all(|t| t.bones()[d] == *bone) {
                continue;
            }
            let unit_weights = observations.iter().all(|obs| {
                let own = &obs.skeleton.bones()[d];
                !own.is_descendant_of(bone) || own.resulting_weight(bone).is_ok_and(|w| w == 1.0)
            });
            if unit_weights {
                collapsed.push(bone.clone());
            }
        }

        if collapsed.is_empty() {
            return self.partition(0, targets, observations);
        }

        let names: Vec<&str> = collapsed.iter().map(Bone::dimension_name).collect();
        tracing::debug!(dimensions = ?names, "Collapsing dimensions shared by all targets");

        let reduced: Vec<ValuedSkeleton<T>> = observations
            .iter()
            .filter(|obs| {
                collapsed.iter().all(|bone| {
                    obs.skeleton
                        .bone(bone.dimension_name())
                        .is_some_and(|own| own.is_descendant_of(bone))
                })
            })
            .map(|obs| ValuedSkeleton {
                skeleton: obs.skeleton.except(&names),
                value: obs.value.clone(),
            })
            .collect();
        let reduced = self.group_observations(&reduced);
        let reduced_targets = distinct(targets.iter().map(|t| t.except(&names)));

        let dropped = Skeleton::new(collapsed.iter().cloned())?;
        self.partition(0, reduced_targets, reduced)?
            .into_iter()
            .map(|acc| {
                let full = acc.skeleton().concat(&dropped)?;
                Ok(acc.with_skeleton(full))
            })
            .collect()
    }

    fn materialize(&self, accumulators: &[SkeletonsAccumulator<T>]) -> Vec<ValuedSkeleton<T>> {
        if self.config.runs_parallel(accumulators.len()) {
            accumulators
                .par_iter()
                .map(SkeletonsAccumulator::to_valued)
                .collect()
        } else {
            accumulators
                .iter()
                .map(SkeletonsAccumulator::to_valued)
                .collect()
        }
    }

    fn force(&self, accumulators: &[SkeletonsAccumulator<T>]) {
        if self.config.runs_parallel(accumulators.len()) {
            accumulators.par_iter().for_each(|a| {
                a.value();
            });
        } else {
            accumulators.iter().for_each(|a| {
                a.value();
            });
        }
    }
}

fn distinct(skeletons: impl IntoIterator<Item = Skeleton>) -> Vec<Skeleton> {
    let mut seen = HashSet::new();
    skeletons
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn mismatch(expected: &Skeleton, found: &Skeleton) -> CubeError {
    CubeError::DimensionMismatch {
        expected: expected.dimension_names().collect::<Vec<_>>().join(", "),
        found: found.dimension_names().collect::<Vec<_>>().join(", "),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
