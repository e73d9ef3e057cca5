use std::collections::HashSet;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::cube::{
    CubeError, Result,
    dimension::Dimension,
    skeleton::{Skeleton, ValuedSkeleton},
};

/// Resolves raw records against a set of dimensions to produce coordinates.
///
/// Each record is mapped to one bone per dimension of interest by asking a
/// resolver for the record's label in that dimension; the first node with a
/// matching label wins (see [`Dimension::find`]).
#[derive(Debug, Clone)]
pub struct SkeletonFactory<'a> {
    dimensions: Vec<&'a Dimension>,
}

impl<'a> SkeletonFactory<'a> {
    /// Factory over every supplied dimension
    pub fn new(dimensions: &'a [Dimension]) -> Result<Self> {
        Self::from_refs(dimensions.iter().collect())
    }

    /// Factory restricted to `of_interest`.
    ///
    /// Fails before any record is processed, naming every requested dimension
    /// absent from `dimensions`.
    pub fn with_dimensions<S: AsRef<str>>(
        dimensions: &'a [Dimension],
        of_interest: &[S],
    ) -> Result<Self> {
        let missing: Vec<String> = of_interest
            .iter()
            .map(|n| n.as_ref())
            .filter(|name| !dimensions.iter().any(|d| d.name() == *name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(CubeError::MissingDimension(missing));
        }

        Self::from_refs(
            dimensions
                .iter()
                .filter(|d| of_interest.iter().any(|n| n.as_ref() == d.name()))
                .collect(),
        )
    }

    fn from_refs(dimensions: Vec<&'a Dimension>) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = dimensions.iter().find(|d| !seen.insert(d.name())) {
            return Err(CubeError::InvalidCoordinate(format!(
                "dimension '{}' is supplied more than once",
                dup.name()
            )));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> impl ExactSizeIterator<Item = &Dimension> {
        self.dimensions.iter().copied()
    }

    fn resolve<R, L, F>(&self, record: &R, resolver: &F) -> Result<Skeleton>
    where
        F: Fn(&R, &str) -> L,
        L: AsRef<str>,
    {
        let bones = self
            .dimensions
            .iter()
            .map(|dim| {
                let label = resolver(record, dim.name());
                dim.find(label.as_ref()).ok_or_else(|| CubeError::MissingValue {
                    label: label.as_ref().to_string(),
                    dimension: dim.name().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Skeleton::new(bones)
    }

    /// One coordinate per record; the first unresolvable label aborts the batch
    pub fn skeletons<R, L, F>(&self, records: &[R], resolver: F) -> Result<Vec<Skeleton>>
    where
        R: Sync,
        F: Fn(&R, &str) -> L + Sync,
        L: AsRef<str>,
    {
        tracing::debug!(
            records = records.len(),
            dimensions = self.dimensions.len(),
            "Resolving skeletons"
        );
        records
            .par_iter()
            .map(|record| self.resolve(record, &resolver))
            .collect()
    }

    /// One observation per record, valued by `extractor`; strict like [`Self::skeletons`]
    pub fn observations<R, T, L, F, V>(
        &self,
        records: &[R],
        resolver: F,
        extractor: V,
    ) -> Result<Vec<ValuedSkeleton<T>>>
    where
        R: Sync,
        T: Send,
        F: Fn(&R, &str) -> L + Sync,
        L: AsRef<str>,
        V: Fn(&R) -> T + Sync,
    {
        tracing::debug!(
            records = records.len(),
            dimensions = self.dimensions.len(),
            "Resolving observations"
        );
        records
            .par_iter()
            .map(|record| {
                self.resolve(record, &resolver)
                    .map(|skeleton| ValuedSkeleton::new(skeleton, extractor(record)))
            })
            .collect()
    }

    /// Like [`Self::observations`], but reports success or failure per record
    pub fn try_observations<R, T, L, F, V>(
        &self,
        records: &[R],
        resolver: F,
        extractor: V,
    ) -> Vec<Result<ValuedSkeleton<T>>>
    where
        R: Sync,
        T: Send,
        F: Fn(&R, &str) -> L + Sync,
        L: AsRef<str>,
        V: Fn(&R) -> T + Sync,
    {
        records
            .par_iter()
            .map(|record| {
                self.resolve(record, &resolver)
                    .map(|skeleton| ValuedSkeleton::new(skeleton, extractor(record)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::dimension::ParentLink;

    struct Sale {
        country: &'static str,
        product: &'static str,
        amount: f64,
    }

    fn dimensions() -> Vec<Dimension> {
        vec![
            Dimension::from_parent_links(
                "geo",
                vec![
                    ParentLink::new("eu", None, "Europe"),
                    ParentLink::new("fr", Some("eu"), "France"),
                ],
            )
            .unwrap(),
            Dimension::from_parent_links(
                "product",
                vec![
                    ParentLink::new("food", None, "Food"),
                    ParentLink::new("bread", Some("food"), "Bread"),
                ],
            )
            .unwrap(),
        ]
    }

    fn label(sale: &Sale, dimension: &str) -> &'static str {
        match dimension {
            "geo" => sale.country,
            _ => sale.product,
        }
    }

    #[test]
    fn test_observations() {
        let dims = dimensions();
        let factory = SkeletonFactory::new(&dims).unwrap();
        let sales = vec![
            Sale { country: "France", product: "Bread", amount: 2.0 },
            Sale { country: "Europe", product: "Food", amount: 5.0 },
        ];
        let obs = factory.observations(&sales, label, |s| s.amount).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].value, Some(2.0));
        assert_eq!(obs[0].skeleton.to_string(), "(geo:France, product:Bread)");
        assert!(obs[1].skeleton.is_root());
    }

    #[test]
    fn test_missing_value_is_strict() {
        let dims = dimensions();
        let factory = SkeletonFactory::new(&dims).unwrap();
        let sales = vec![Sale { country: "Spain", product: "Bread", amount: 1.0 }];
        match factory.skeletons(&sales, label).unwrap_err() {
            CubeError::MissingValue { label, dimension } => {
                assert_eq!(label, "Spain");
                assert_eq!(dimension, "geo");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_try_observations_reports_per_record() {
        let dims = dimensions();
        let factory = SkeletonFactory::new(&dims).unwrap();
        let sales = vec![
            Sale { country: "Spain", product: "Bread", amount: 1.0 },
            Sale { country: "France", product: "Bread", amount: 3.0 },
        ];
        let out = factory.try_observations(&sales, label, |s| s.amount);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap().value, Some(3.0));
    }

    #[test]
    fn test_dimensions_of_interest() {
        let dims = dimensions();
        let factory = SkeletonFactory::with_dimensions(&dims, &["product"]).unwrap();
        let sales = vec![Sale { country: "nowhere", product: "Bread", amount: 1.0 }];
        let skeletons = factory.skeletons(&sales, label).unwrap();
        assert_eq!(skeletons[0].len(), 1);

        match SkeletonFactory::with_dimensions(&dims, &["time", "product", "channel"]) {
            Err(CubeError::MissingDimension(names)) => assert_eq!(names, vec!["time", "channel"]),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
