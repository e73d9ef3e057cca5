use std::marker::PhantomData;

use thiserror::Error;

/// Raised when the number of tuples does not fit in a `usize`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cartesian product of sequence lengths {lengths:?} overflows usize")]
pub struct ProductOverflow {
    pub lengths: Vec<usize>,
}

/// Lazy n-ary Cartesian product in odometer order (the last sequence varies fastest).
///
/// The product is restartable: clone it before iterating, or build a new one
/// from the same (borrowed) sequences.
#[derive(Debug, Clone)]
pub struct Cartesian<S, T> {
    sequences: S,
    positions: Vec<usize>,
    remaining: usize,
    _item: PhantomData<T>,
}

/// Product over borrowed sequences
pub fn cartesian<T: Clone>(
    sequences: &[Vec<T>],
) -> Result<Cartesian<&[Vec<T>], T>, ProductOverflow> {
    Cartesian::over(sequences)
}

/// Number of tuples the product of `sequences` yields
pub fn product_len<T>(sequences: &[Vec<T>]) -> Result<usize, ProductOverflow> {
    checked_product(sequences.iter().map(Vec::len))
}

/// Product of `lengths`; the empty product is 1
pub fn checked_product(
    lengths: impl IntoIterator<Item = usize> + Clone,
) -> Result<usize, ProductOverflow> {
    lengths
        .clone()
        .into_iter()
        .try_fold(1usize, |acc, len| acc.checked_mul(len))
        .ok_or_else(|| ProductOverflow {
            lengths: lengths.into_iter().collect(),
        })
}

impl<T: Clone> Cartesian<Vec<Vec<T>>, T> {
    /// Product owning its sequences
    pub fn owned(sequences: Vec<Vec<T>>) -> Result<Self, ProductOverflow> {
        Cartesian::over(sequences)
    }
}

impl<S: AsRef<[Vec<T>]>, T: Clone> Cartesian<S, T> {
    fn over(sequences: S) -> Result<Self, ProductOverflow> {
        let seqs = sequences.as_ref();
        // Product of no sequences is a single empty tuple
        let remaining = product_len(seqs)?;
        let positions = vec![0; seqs.len()];

        Ok(Cartesian {
            sequences,
            positions,
            remaining,
            _item: PhantomData,
        })
    }
}

impl<S: AsRef<[Vec<T>]>, T: Clone> Iterator for Cartesian<S, T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let seqs = self.sequences.as_ref();

        let tuple = self
            .positions
            .iter()
            .zip(seqs)
            .map(|(&pos, seq)| seq[pos].clone())
            .collect();

        self.remaining -= 1;

        // Advance the odometer
        for i in (0..self.positions.len()).rev() {
            self.positions[i] += 1;
            if self.positions[i] < seqs[i].len() {
                break;
            }
            self.positions[i] = 0;
        }

        Some(tuple)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<S: AsRef<[Vec<T>]>, T: Clone> ExactSizeIterator for Cartesian<S, T> {}
