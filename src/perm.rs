//! Random trial ordering.
//!
//! One permutation is drawn per task and applied to every parallel list
//! (targets, completions) so that entries at the same index stay paired.

use rand::Rng;
use rand::seq::SliceRandom;

/// A permutation of `0..len`. `order()[i]` is the source index placed at `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    /// Uniformly random permutation of `0..len`.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(rng);
        Self { order }
    }

    pub fn identity(len: usize) -> Self {
        Self {
            order: (0..len).collect(),
        }
    }

    /// Wrap an explicit ordering. Returns `None` unless `order` holds every
    /// index of `0..order.len()` exactly once.
    pub fn from_order(order: Vec<usize>) -> Option<Self> {
        let mut seen = vec![false; order.len()];
        for &i in &order {
            if i >= seen.len() || seen[i] {
                return None;
            }
            seen[i] = true;
        }
        Some(Self { order })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Reorder `items`. Panics if `items.len() != self.len()`; callers check
    /// list lengths before permuting.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        assert_eq!(items.len(), self.order.len(), "permutation length mismatch");
        self.order.iter().map(|&i| items[i].clone()).collect()
    }
}

/// Shorthand for a random permutation of `0..len` as plain indices.
pub fn randperm<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<usize> {
    Permutation::random(len, rng).order
}
