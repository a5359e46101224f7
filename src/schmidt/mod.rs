/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The linear-space stabbing forest of Schmidt.
//!
//! Preprocessing sweeps the domain once, keeping the currently-active
//! intervals in a status list ordered by left endpoint. Opening an interval
//! appends it; closing it links it under the interval preceding it in the
//! list (or under the synthetic root), which threads an implicit forest
//! through the interval records. For every coordinate the last element of
//! the status list is recorded in the `stop` table and becomes the entry
//! point of the query traversal, which then reports exactly the intervals
//! containing the query point in O(1 + k).
//!
//! Intervals sharing a left endpoint are represented in the forest by their
//! widest member only; the rest hang off its `smaller` chain and are scanned
//! as a by-product of the traversal.

use crate::intervals::{Interval, Node, NodeRef};
use crate::traits::Stabbing;
use crate::utils::StatusList;
use anyhow::{ensure, Result};
use log::debug;

/// Ingest staging for [`FastStabbing`].
///
/// Intervals are validated as they are added; [`build`](Self::build) sorts
/// them and runs the sweep. The builder is consumed, so the index can only be
/// observed fully built.
#[derive(Clone, Debug)]
pub struct FastStabbingBuilder<T = ()> {
    big_n: u64,
    intervals: Vec<Interval<T>>,
}

impl<T> FastStabbingBuilder<T> {
    /// Creates a builder over the domain `[1, big_n]`.
    pub fn new(big_n: u64) -> Self {
        Self {
            big_n,
            intervals: Vec::new(),
        }
    }

    /// Stages the interval `[l, r]`.
    pub fn add(&mut self, l: u64, r: u64, payload: T) -> Result<()> {
        ensure!(l >= 1, "left endpoint {} below 1", l);
        ensure!(l <= r, "invalid interval [{}, {}]", l, r);
        ensure!(
            r <= self.big_n,
            "right endpoint {} beyond the domain bound {}",
            r,
            self.big_n
        );
        self.intervals.push(Interval::new(l, r, payload));
        Ok(())
    }

    /// Sorts the staged intervals and builds the stabbing forest.
    pub fn build(mut self) -> Result<FastStabbing<T>> {
        debug!(
            "Building stabbing forest over {} intervals, domain [1, {}]",
            self.intervals.len(),
            self.big_n
        );
        self.intervals
            .sort_unstable_by(|x, y| x.cmp_widest_first(y));
        let mut nodes: Box<[Node<T>]> = self.intervals.into_iter().map(Node::new).collect();
        let mut stop = vec![NodeRef::NULL; self.big_n as usize + 1].into_boxed_slice();
        build_forest(&mut nodes, &mut stop, self.big_n);
        Ok(FastStabbing {
            big_n: self.big_n,
            nodes,
            stop,
        })
    }
}

/// The in-memory Schmidt index. See the [module documentation](self).
#[derive(Clone, Debug)]
pub struct FastStabbing<T = ()> {
    big_n: u64,
    nodes: Box<[Node<T>]>,
    stop: Box<[NodeRef]>,
}

impl<T> Stabbing for FastStabbing<T> {
    type Payload = T;

    fn num_intervals(&self) -> usize {
        self.nodes.len()
    }

    fn domain(&self) -> u64 {
        self.big_n
    }

    fn interval(&self, index: usize) -> &Interval<T> {
        &self.nodes[index].interval
    }

    fn query_into(&self, q: u64, out: &mut Vec<usize>) -> u64 {
        let comparisons = stab_query(&self.nodes, &self.stop, self.big_n, q, out);
        debug_assert!(verify_query(&self.nodes, q, out));
        comparisons
    }

    fn stab_any(&self, q: u64) -> Option<&Interval<T>> {
        stab_any(&self.nodes, &self.stop, self.big_n, q)
    }
}

/// Builds the forest links and the stop table over `nodes`, which must be
/// sorted by [`Interval::cmp_widest_first`].
fn build_forest<T>(nodes: &mut [Node<T>], stop: &mut [NodeRef], big_n: u64) {
    let n = nodes.len();
    debug_assert_eq!(stop.len(), big_n as usize + 1);

    let mut eventlist: Vec<Vec<NodeRef>> = Vec::from_iter((0..=big_n).map(|_| Vec::new()));
    // Smaller chains for shared left endpoints; only the canonical (widest)
    // member of each group enters the event lists. The right event is pushed
    // before the left one so that the left event sits last in its bucket.
    for i in 0..n {
        if i > 0 && nodes[i - 1].interval.l == nodes[i].interval.l {
            debug_assert!(nodes[i - 1].interval.r >= nodes[i].interval.r);
            nodes[i - 1].smaller = NodeRef::new(i);
        } else {
            let (l, r) = (nodes[i].interval.l, nodes[i].interval.r);
            eventlist[r as usize].push(NodeRef::new(i));
            eventlist[l as usize].push(NodeRef::new(i));
        }
    }

    let mut list = StatusList::with_capacity(n);
    let mut root_rightchild = NodeRef::NULL;
    for i in 1..=big_n {
        let bucket = &mut eventlist[i as usize];
        // the interval starting here, if any, was appended last
        if let Some(&x) = bucket.last() {
            if nodes[x.index()].interval.l == i {
                let handle = list.push_back(x);
                nodes[x.index()].p_it = handle as u64 + 1;
                bucket.pop();
            }
        }
        if let Some(back) = list.back() {
            stop[i as usize] = back;
            // close the intervals ending here, most recently appended first
            for k in (0..bucket.len()).rev() {
                let x = bucket[k];
                debug_assert_eq!(nodes[x.index()].interval.r, i);
                let handle = (nodes[x.index()].p_it - 1) as usize;
                let parent = list.pred(handle).unwrap_or(NodeRef::ROOT);
                let prev_child = if parent.is_root() {
                    root_rightchild
                } else {
                    nodes[parent.index()].rightchild
                };
                nodes[x.index()].parent = parent;
                nodes[x.index()].leftsibling = prev_child;
                if parent.is_root() {
                    root_rightchild = x;
                } else {
                    nodes[parent.index()].rightchild = x;
                }
                list.remove(handle);
            }
            bucket.clear();
        } else {
            debug_assert!(bucket.is_empty());
        }
    }
    // every opener must have drained by the end of the domain
    debug_assert!(list.is_empty());
}

/// The query traversal shared by the in-memory and external incarnations.
///
/// Climbs from `stop[q]` to the synthetic root, then expands each frontier
/// node into the stabbed prefix of its `smaller` chain and the rightmost
/// paths hanging off its left siblings. The expansion yields one chunk per
/// forest node in descending left endpoint; emitting the chunks in reverse
/// produces the index sort order (`l` ascending, ties widest first).
///
/// Returns the number of endpoint comparisons performed.
///
/// # Panics
///
/// If `q` is outside `[1, bigN + 1]`.
pub(crate) fn stab_query<T>(
    nodes: &[Node<T>],
    stop: &[NodeRef],
    big_n: u64,
    q: u64,
    out: &mut Vec<usize>,
) -> u64 {
    assert!(
        q >= 1 && q <= big_n + 1,
        "query point {} outside [1, {}]",
        q,
        big_n + 1
    );
    out.clear();
    if q > big_n {
        // bigN + 1 is beyond every right endpoint
        return 0;
    }
    let entry = stop[q as usize];
    if entry.is_null() {
        return 0;
    }
    let mut comparisons = 0;

    let mut process = Vec::new();
    let mut t = entry;
    loop {
        process.push(t);
        let parent = nodes[t.index()].parent;
        if parent.is_root() {
            break;
        }
        t = parent;
    }
    // deepest ancestor on top of the stack
    process.reverse();

    let mut raw = Vec::new();
    let mut chunk_starts = Vec::new();
    while let Some(x) = process.pop() {
        chunk_starts.push(raw.len());
        raw.push(x.index());

        // the smaller chain is non-increasing in r: stop at the first miss
        let mut t = nodes[x.index()].smaller;
        while !t.is_null() {
            comparisons += 1;
            if q > nodes[t.index()].interval.r {
                break;
            }
            raw.push(t.index());
            t = nodes[t.index()].smaller;
        }

        // rightmost path hanging off the left sibling
        let mut t = nodes[x.index()].leftsibling;
        while !t.is_null() {
            comparisons += 1;
            if nodes[t.index()].interval.r < q {
                break;
            }
            process.push(t);
            t = nodes[t.index()].rightchild;
        }
    }

    out.reserve(raw.len());
    let mut end = raw.len();
    for &start in chunk_starts.iter().rev() {
        out.extend_from_slice(&raw[start..end]);
        end = start;
    }
    comparisons
}

pub(crate) fn stab_any<'a, T>(
    nodes: &'a [Node<T>],
    stop: &[NodeRef],
    big_n: u64,
    q: u64,
) -> Option<&'a Interval<T>> {
    assert!(
        q >= 1 && q <= big_n + 1,
        "query point {} outside [1, {}]",
        q,
        big_n + 1
    );
    if q > big_n {
        return None;
    }
    let entry = stop[q as usize];
    (!entry.is_null()).then(|| &nodes[entry.index()].interval)
}

/// Debug check: the output is sorted in the index order, free of duplicates,
/// and equals the stabbed set recomputed by exhaustive scan.
pub(crate) fn verify_query<T>(nodes: &[Node<T>], q: u64, out: &[usize]) -> bool {
    use std::collections::HashSet;
    for pair in out.windows(2) {
        let a = &nodes[pair[0]].interval;
        let b = &nodes[pair[1]].interval;
        if a.cmp_widest_first(b) == core::cmp::Ordering::Greater {
            return false;
        }
    }
    let reported: HashSet<usize> = out.iter().copied().collect();
    if reported.len() != out.len() {
        return false;
    }
    (0..nodes.len()).all(|i| reported.contains(&i) == nodes[i].interval.stabs(q))
}
