/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Core abstraction implemented by every index incarnation.

use crate::intervals::Interval;

/// A static interval stabbing index over the integer domain `[1, bigN]`.
///
/// After construction an index is read-only: queries take `&self`, are pure,
/// and may run concurrently from multiple threads.
pub trait Stabbing {
    type Payload;

    /// The number of indexed intervals.
    fn num_intervals(&self) -> usize;

    /// The domain bound `bigN`.
    fn domain(&self) -> u64;

    /// The interval stored in arena slot `index`.
    fn interval(&self, index: usize) -> &Interval<Self::Payload>;

    /// Clears `out` and fills it with the arena indices of the intervals
    /// containing `q`, in the incarnation's sort order. Returns the number of
    /// endpoint comparisons performed by the traversal.
    ///
    /// # Panics
    ///
    /// If `q` is outside `[1, bigN + 1]`. A query at `bigN + 1` is allowed
    /// and reports nothing.
    fn query_into(&self, q: u64, out: &mut Vec<usize>) -> u64;

    /// Returns some interval containing `q`, without enumerating the rest.
    fn stab_any(&self, q: u64) -> Option<&Interval<Self::Payload>>;

    /// Returns the intervals containing `q`, in the incarnation's sort order.
    ///
    /// # Panics
    ///
    /// If `q` is outside `[1, bigN + 1]`.
    fn query(&self, q: u64) -> Vec<&Interval<Self::Payload>> {
        let mut out = Vec::new();
        self.query_into(q, &mut out);
        out.into_iter().map(|index| self.interval(index)).collect()
    }
}
