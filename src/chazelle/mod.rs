/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The windowed filtering structure of Chazelle.
//!
//! The sweep partitions the domain into windows, each holding the intervals
//! active at (or inserted since) its opening. A window stays open while the
//! number of intervals inserted into it is at most δ times the minimum
//! active count observed since it opened; when the invariant would break the
//! window is snapshotted and a pruned copy takes over. A query scans the
//! window covering the point (two windows when the point sits exactly on a
//! boundary) and filters by containment, so it costs O(δ·k), with total
//! storage below `2δN/(δ−1)`.
//!
//! Degenerate one-point intervals never enter windows: they are kept aside
//! and merged into the output at query time.

use crate::intervals::Interval;
use crate::traits::Stabbing;
use anyhow::{ensure, Result};
use log::debug;
use std::collections::HashSet;

const NO_WINDOW: usize = usize::MAX;
const NO_DEGENERATE: usize = usize::MAX;

#[derive(Clone, Debug)]
struct Window {
    /// The coordinate at which this window (re)opened.
    l: u64,
    intervals: Vec<usize>,
}

/// Ingest staging for [`ChazelleStabbing`].
#[derive(Clone, Debug)]
pub struct ChazelleStabbingBuilder<T = ()> {
    big_n: u64,
    delta: f64,
    intervals: Vec<Interval<T>>,
}

impl<T> ChazelleStabbingBuilder<T> {
    /// Creates a builder over the domain `[1, big_n]` with density parameter
    /// `delta`. Rejects `delta ≤ 1`.
    pub fn new(big_n: u64, delta: f64) -> Result<Self> {
        ensure!(
            delta > 1.0 && delta.is_finite(),
            "density parameter {} must be a finite real > 1",
            delta
        );
        Ok(Self {
            big_n,
            delta,
            intervals: Vec::new(),
        })
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

    /// Sorts the staged intervals and builds the window sequence.
    pub fn build(mut self) -> Result<ChazelleStabbing<T>> {
        debug!(
            "Building Chazelle windows over {} intervals, domain [1, {}], delta {}",
            self.intervals.len(),
            self.big_n,
            self.delta
        );
        self.intervals
            .sort_unstable_by(|x, y| x.cmp_narrowest_first(y));
        let index = build_windows(self.intervals, self.big_n, self.delta);
        Ok(index)
    }
}

/// The in-memory Chazelle index. See the [module documentation](self).
#[derive(Clone, Debug)]
pub struct ChazelleStabbing<T = ()> {
    big_n: u64,
    delta: f64,
    /// Sorted by `l` ascending, ties `r` ascending.
    intervals: Box<[Interval<T>]>,
    windows: Box<[Window]>,
    /// Window to consult per coordinate; `NO_WINDOW` when nothing is active.
    p_window: Box<[usize]>,
    /// First degenerate interval per coordinate; duplicates are adjacent in
    /// the sorted array.
    degenerate: Box<[usize]>,
}

fn build_windows<T>(intervals: Vec<Interval<T>>, big_n: u64, delta: f64) -> ChazelleStabbing<T> {
    let n = intervals.len();
    let mut eventlist: Vec<Vec<usize>> = Vec::from_iter((0..=big_n).map(|_| Vec::new()));
    let mut degenerate = vec![NO_DEGENERATE; big_n as usize + 1].into_boxed_slice();
    for (i, interval) in intervals.iter().enumerate() {
        if interval.is_degenerate() {
            // the first of an adjacent run of degenerates at this coordinate
            if degenerate[interval.l as usize] == NO_DEGENERATE {
                degenerate[interval.l as usize] = i;
            }
        } else {
            eventlist[interval.r as usize].push(i);
            eventlist[interval.l as usize].push(i);
        }
    }

    let mut windows = vec![Window {
        // below every coordinate, so the first opening mutates this window
        // in place instead of snapshotting it
        l: 0,
        intervals: Vec::new(),
    }];
    let mut p_window = vec![NO_WINDOW; big_n as usize + 1].into_boxed_slice();
    let mut last_p = NO_WINDOW;
    let mut cur = 0u64; // active intervals
    let mut t = 0u64; // intervals inserted into the current window
    let mut low = 0u64; // minimum of cur since the current window opened

    for i in 1..=big_n {
        p_window[i as usize] = last_p;
        for k in 0..eventlist[i as usize].len() {
            let idx = eventlist[i as usize][k];
            if intervals[idx].l == i {
                // opening event
                cur += 1;
                t += 1;
                if t as f64 > delta * low as f64 {
                    let w = windows.len() - 1;
                    if windows[w].l < i && t > 1 {
                        // snapshot the current window so earlier coordinates
                        // keep addressing it, then prune the successor
                        let mut fresh = windows[w].clone();
                        fresh.intervals.retain(|&j| intervals[j].r > i);
                        windows.push(fresh);
                    }
                    let w = windows.len() - 1;
                    windows[w].l = i;
                    windows[w].intervals.push(idx);
                    p_window[i as usize] = w;
                    last_p = w;
                    low = cur;
                    t = cur;
                } else {
                    let w = windows.len() - 1;
                    windows[w].intervals.push(idx);
                }
            } else {
                // closing event
                debug_assert_eq!(intervals[idx].r, i);
                cur -= 1;
                if cur < low {
                    low = cur;
                }
                if t as f64 > delta * low as f64 {
                    let w = windows.len() - 1;
                    if windows[w].l < i {
                        let mut fresh = windows[w].clone();
                        fresh.intervals.retain(|&j| {
                            let keep = intervals[j].r > i;
                            if !keep {
                                t -= 1;
                            }
                            keep
                        });
                        windows.push(fresh);
                    } else {
                        t = cur;
                    }
                    let w = windows.len() - 1;
                    windows[w].l = i;
                    low = t;
                    if t == 0 {
                        last_p = NO_WINDOW;
                    } else {
                        p_window[i as usize] = w;
                        last_p = w;
                    }
                }
            }
        }
    }

    let index = ChazelleStabbing {
        big_n,
        delta,
        intervals: intervals.into_boxed_slice(),
        windows: windows.into_boxed_slice(),
        p_window,
        degenerate,
    };
    debug_assert!(
        n == 0 || (index.stored_refs() as f64) < 2.0 * delta * n as f64 / (delta - 1.0),
        "window storage {} breaks the 2δN/(δ−1) bound",
        index.stored_refs()
    );
    index
}

impl<T> ChazelleStabbing<T> {
    /// The density parameter this index was built with.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// The number of windows, including the trailing sentinel.
    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    /// Total interval references stored across all windows; bounded by
    /// `2δN/(δ−1)`.
    pub fn stored_refs(&self) -> usize {
        self.windows.iter().map(|w| w.intervals.len()).sum()
    }

    /// Emits the run of degenerate intervals at `q`, if any.
    fn push_degenerates(&self, q: u64, out: &mut Vec<usize>) {
        let mut d = self.degenerate[q as usize];
        if d == NO_DEGENERATE {
            return;
        }
        while d < self.intervals.len() && self.intervals[d].l == q && self.intervals[d].r == q {
            out.push(d);
            d += 1;
        }
    }

    /// Debug check: output sorted ascending, duplicate-free, and equal to
    /// the stabbed set recomputed by exhaustive scan.
    fn verify(&self, q: u64, out: &[usize]) -> bool {
        for pair in out.windows(2) {
            let a = &self.intervals[pair[0]];
            let b = &self.intervals[pair[1]];
            if a.cmp_narrowest_first(b) == core::cmp::Ordering::Greater {
                return false;
            }
        }
        let reported: HashSet<usize> = out.iter().copied().collect();
        if reported.len() != out.len() {
            return false;
        }
        (0..self.intervals.len()).all(|i| reported.contains(&i) == self.intervals[i].stabs(q))
    }
}

impl<T> Stabbing for ChazelleStabbing<T> {
    type Payload = T;

    fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    fn domain(&self) -> u64 {
        self.big_n
    }

    fn interval(&self, index: usize) -> &Interval<T> {
        &self.intervals[index]
    }

    fn query_into(&self, q: u64, out: &mut Vec<usize>) -> u64 {
        assert!(
            q >= 1 && q <= self.big_n + 1,
            "query point {} outside [1, {}]",
            q,
            self.big_n + 1
        );
        out.clear();
        if q > self.big_n {
            return 0;
        }
        let mut comparisons = 0u64;
        let mut deg = self.degenerate[q as usize];

        let pw = self.p_window[q as usize];
        if pw == NO_WINDOW {
            self.push_degenerates(q, out);
            debug_assert!(self.verify(q, out));
            return 0;
        }

        // Transient per-query marking replaces the in-place flags of a
        // single-threaded implementation, keeping queries shareable.
        let mut seen = HashSet::new();
        if q > 1 && self.windows[pw].l == q && self.p_window[q as usize - 1] != NO_WINDOW {
            // the point sits on a window boundary: the previous window holds
            // intervals that ended exactly here and were pruned away
            let prev = self.p_window[q as usize - 1];
            for &j in &self.windows[prev].intervals {
                comparisons += 1;
                if self.intervals[j].l <= q {
                    comparisons += 1;
                    if q <= self.intervals[j].r {
                        if deg != NO_DEGENERATE && q <= self.intervals[j].l {
                            self.push_degenerates(q, out);
                            deg = NO_DEGENERATE;
                        }
                        out.push(j);
                        seen.insert(j);
                    }
                }
            }
        }
        for &j in &self.windows[pw].intervals {
            comparisons += 1;
            if self.intervals[j].l <= q {
                comparisons += 1;
                if q <= self.intervals[j].r && !seen.contains(&j) {
                    if deg != NO_DEGENERATE && q <= self.intervals[j].l {
                        self.push_degenerates(q, out);
                        deg = NO_DEGENERATE;
                    }
                    out.push(j);
                }
            }
        }
        if deg != NO_DEGENERATE {
            self.push_degenerates(q, out);
        }
        debug_assert!(self.verify(q, out));
        comparisons
    }

    fn stab_any(&self, q: u64) -> Option<&Interval<T>> {
        assert!(
            q >= 1 && q <= self.big_n + 1,
            "query point {} outside [1, {}]",
            q,
            self.big_n + 1
        );
        if q > self.big_n {
            return None;
        }
        if self.degenerate[q as usize] != NO_DEGENERATE {
            return Some(&self.intervals[self.degenerate[q as usize]]);
        }
        let pw = self.p_window[q as usize];
        if pw == NO_WINDOW {
            return None;
        }
        if q > 1 && self.windows[pw].l == q && self.p_window[q as usize - 1] != NO_WINDOW {
            let prev = self.p_window[q as usize - 1];
            if let Some(&j) = self.windows[prev]
                .intervals
                .iter()
                .find(|&&j| self.intervals[j].stabs(q))
            {
                return Some(&self.intervals[j]);
            }
        }
        self.windows[pw]
            .intervals
            .iter()
            .find(|&&j| self.intervals[j].stabs(q))
            .map(|&j| &self.intervals[j])
    }
}
