//! Reducers used by the aggregation engine.
//!
//! Two roles exist: a [`GroupAggregator`] collapses observations that share a
//! coordinate, a [`WeightedAggregator`] turns the `(weight, value)` pairs of an
//! accumulator into its final value. Plain closures implement both.
//!
//! The engine always runs the group reducer first, so a weighted reducer sees
//! one value per distinct coordinate: for [`Count`] that value is already a
//! row count, for [`Avg`] it is the mean of the coordinate's rows.

/// Reduces the values of observations that landed on the same coordinate
pub trait GroupAggregator<T>: Send + Sync {
    fn reduce(&self, values: &[T]) -> T;
}

/// Reduces weighted contributions into an aggregated value
pub trait WeightedAggregator<T>: Send + Sync {
    fn aggregate(&self, contributions: &[(f64, &T)]) -> T;
}

/// Marker for group reducers that are associative and commutative.
///
/// Only engines built on such a reducer may pre-aggregate observations
/// (see `CubeAggregator::with_simplification`), since doing so regroups the
/// reduction.
pub trait CommutativeAggregator<T>: GroupAggregator<T> {}

/// Marker for weighted reducers whose result does not change when
/// contributions carrying the same weight are first merged with `G`.
///
/// `CubeAggregator::with_simplification` requires it: collapsing a dimension
/// folds several observations into one before the weighted reduction, so a
/// reducer that depends on how many contributors it sees (a count, a mean)
/// would give a different answer. Weights are assumed non-negative.
pub trait MergesWith<T, G: GroupAggregator<T>>: WeightedAggregator<T> {}

impl<T, F> GroupAggregator<T> for F
where
    F: Fn(&[T]) -> T + Send + Sync,
{
    fn reduce(&self, values: &[T]) -> T {
        self(values)
    }
}

impl<T, F> WeightedAggregator<T> for F
where
    F: Fn(&[(f64, &T)]) -> T + Send + Sync,
{
    fn aggregate(&self, contributions: &[(f64, &T)]) -> T {
        self(contributions)
    }
}

/// Measures that can be multiplied by a contribution weight
pub trait Scale {
    fn scale(&self, weight: f64) -> Self;
}

impl Scale for f64 {
    fn scale(&self, weight: f64) -> Self {
        self * weight
    }
}

impl Scale for f32 {
    fn scale(&self, weight: f64) -> Self {
        (*self as f64 * weight) as f32
    }
}

/// Weighted aggregator that scales every value by its weight, then reduces
/// with a group aggregator
#[derive(Debug, Clone, Copy, Default)]
pub struct Scaled<G>(pub G);

impl<T, G> WeightedAggregator<T> for Scaled<G>
where
    T: Scale,
    G: GroupAggregator<T>,
{
    fn aggregate(&self, contributions: &[(f64, &T)]) -> T {
        let scaled: Vec<T> = contributions.iter().map(|(w, v)| v.scale(*w)).collect();
        self.0.reduce(&scaled)
    }
}

/// Sum of values; weighted form is `Σ w·v`
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

/// Smallest value; weighted form is `min(w·v)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

/// Largest value; weighted form is `max(w·v)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

/// Mean; weighted form is `Σ w·v / Σ w` over per-coordinate means, so a
/// coordinate with many rows weighs as much as one with a single row
#[derive(Debug, Clone, Copy, Default)]
pub struct Avg;

/// Number of values; weighted form is `Σ w·n` over per-coordinate row counts `n`
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl GroupAggregator<f64> for Sum {
    fn reduce(&self, values: &[f64]) -> f64 {
        values.iter().sum()
    }
}

impl WeightedAggregator<f64> for Sum {
    fn aggregate(&self, contributions: &[(f64, &f64)]) -> f64 {
        contributions.iter().map(|(w, v)| w * **v).sum()
    }
}

impl CommutativeAggregator<f64> for Sum {}

impl GroupAggregator<f64> for Min {
    fn reduce(&self, values: &[f64]) -> f64 {
        values.iter().fold(f64::INFINITY, |a, &b| a.min(b))
    }
}

impl WeightedAggregator<f64> for Min {
    fn aggregate(&self, contributions: &[(f64, &f64)]) -> f64 {
        contributions
            .iter()
            .fold(f64::INFINITY, |a, (w, v)| a.min(w * **v))
    }
}

impl CommutativeAggregator<f64> for Min {}

impl GroupAggregator<f64> for Max {
    fn reduce(&self, values: &[f64]) -> f64 {
        values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b))
    }
}

impl WeightedAggregator<f64> for Max {
    fn aggregate(&self, contributions: &[(f64, &f64)]) -> f64 {
        contributions
            .iter()
            .fold(f64::NEG_INFINITY, |a, (w, v)| a.max(w * **v))
    }
}

impl CommutativeAggregator<f64> for Max {}

impl GroupAggregator<f64> for Avg {
    fn reduce(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl WeightedAggregator<f64> for Avg {
    fn aggregate(&self, contributions: &[(f64, &f64)]) -> f64 {
        let total: f64 = contributions.iter().map(|(w, _)| w).sum();
        if total == 0.0 {
            return f64::NAN;
        }
        contributions.iter().map(|(w, v)| w * **v).sum::<f64>() / total
    }
}

impl GroupAggregator<f64> for Count {
    fn reduce(&self, values: &[f64]) -> f64 {
        values.len() as f64
    }
}

impl WeightedAggregator<f64> for Count {
    fn aggregate(&self, contributions: &[(f64, &f64)]) -> f64 {
        contributions.iter().map(|(w, n)| w * **n).sum()
    }
}

impl MergesWith<f64, Sum> for Sum {}
impl MergesWith<f64, Min> for Min {}
impl MergesWith<f64, Max> for Max {}
impl MergesWith<f64, Sum> for Scaled<Sum> {}
impl MergesWith<f64, Min> for Scaled<Min> {}
impl MergesWith<f64, Max> for Scaled<Max> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_builtins() {
        let (a, b) = (10.0, 4.0);
        let contributions = [(0.5, &a), (1.0, &b)];
        assert_eq!(Sum.aggregate(&contributions), 9.0);
        assert_eq!(Min.aggregate(&contributions), 4.0);
        assert_eq!(Max.aggregate(&contributions), 5.0);
        // Counts of 10 and 4 rows, the first at half weight
        assert_eq!(Count.aggregate(&contributions), 9.0);
        assert_eq!(Avg.aggregate(&contributions), 6.0);
    }

    #[test]
    fn test_group_builtins() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(Sum.reduce(&values), 6.0);
        assert_eq!(Min.reduce(&values), 1.0);
        assert_eq!(Max.reduce(&values), 3.0);
        assert_eq!(Avg.reduce(&values), 2.0);
        assert_eq!(Count.reduce(&values), 3.0);
    }

    #[test]
    fn test_closures_and_scaled() {
        let concat = |values: &[String]| values.join("+");
        assert_eq!(concat.reduce(&["a".to_string(), "b".to_string()]), "a+b");

        let (a, b) = (2.0f64, 3.0f64);
        let scaled = Scaled(Sum);
        assert_eq!(scaled.aggregate(&[(2.0, &a), (0.5, &b)]), 5.5);

        let first = |c: &[(f64, &f64)]| *c[0].1;
        assert_eq!(first.aggregate(&[(9.0, &a)]), 2.0);
    }
}
