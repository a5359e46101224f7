/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The externalized incarnation of the stabbing forest.
//!
//! Algorithmically identical to [`FastStabbing`](crate::schmidt::FastStabbing),
//! but every large array is a fixed-record file exposed through a memory
//! mapping, so the index may exceed RAM. All references stored in records are
//! arena indices ([`NodeRef`]), never addresses, which keeps the files valid
//! across process restarts.
//!
//! On-disk layout, little-endian fixed records:
//!
//! | file                      | record                                     |
//! |---------------------------|--------------------------------------------|
//! | `<base>.tmp_write.<i>`    | staged [`Interval`], one file per producer |
//! | `<base>.intervals`        | staged [`Interval`], merged and sorted     |
//! | `<base>.nodes`            | [`Node`]: interval, links, handle          |
//! | `<base>.stop`             | [`NodeRef`] per coordinate, `bigN + 1`     |
//! | `<base>.eventlist`        | [`NodeRef`] per slot, two per canonical    |
//! | `<base>.eventlist.layout` | `u64` per coordinate, prefix-sum offsets   |
//!
//! The staging, event-list and layout files are build-time temporaries with
//! guaranteed unmap-and-unlink; only `<base>.nodes` and `<base>.stop`
//! persist, and [`ExternalStabbing::open`] rebuilds an index from those two
//! alone.

use crate::intervals::{Interval, Node, NodeRef, Record};
use crate::schmidt::{stab_any, stab_query, verify_query};
use crate::traits::Stabbing;
use crate::utils::{MmapBackend, ScopedMmap, StatusList};
use anyhow::{ensure, Context, Result};
use dsi_progress_logger::prelude::*;
use log::info;
use mmap_rs::{MmapFlags, MmapMut};
use rayon::prelude::*;
use rdst::RadixSort;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

mod staging;
pub use staging::IntervalWriter;
pub(crate) use staging::Staging;

mod succinct;
pub use succinct::SuccinctStabbingBuilder;

pub(crate) fn intervals_path(base: &Path) -> PathBuf {
    staging::suffixed(base, ".intervals")
}

pub(crate) fn nodes_path(base: &Path) -> PathBuf {
    staging::suffixed(base, ".nodes")
}

pub(crate) fn stop_path(base: &Path) -> PathBuf {
    staging::suffixed(base, ".stop")
}

pub(crate) fn eventlist_path(base: &Path) -> PathBuf {
    staging::suffixed(base, ".eventlist")
}

pub(crate) fn eventlist_layout_path(base: &Path) -> PathBuf {
    staging::suffixed(base, ".eventlist.layout")
}

/// Ingest staging and build driver for [`ExternalStabbing`].
#[derive(Debug)]
pub struct ExternalStabbingBuilder<T: Record = ()> {
    base: PathBuf,
    big_n: Option<u64>,
    staging: Staging<T>,
    scratch: Option<TempDir>,
}

impl<T: Record> ExternalStabbingBuilder<T> {
    /// Creates a builder writing `<base>.*` files, with one staging writer
    /// per CPU and the domain bound derived from the data at
    /// [`index`](Self::index) time.
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self> {
        Self::with_options(base, None, num_cpus::get())
    }

    /// Creates a builder with an explicit domain bound (enforced at ingest)
    /// and staging writer count.
    pub fn with_options<P: AsRef<Path>>(
        base: P,
        big_n: Option<u64>,
        num_writers: usize,
    ) -> Result<Self> {
        let base = base.as_ref().to_owned();
        let staging = Staging::new(&base, big_n, num_writers)?;
        Ok(Self {
            base,
            big_n,
            staging,
            scratch: None,
        })
    }

    /// Creates a builder whose files live in a fresh temporary directory that
    /// is removed when the built index is dropped.
    pub fn anonymous(big_n: Option<u64>, num_writers: usize) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("intervalstab")
            .tempdir()
            .context("Cannot create scratch directory")?;
        let base = scratch.path().join("index");
        let staging = Staging::new(&base, big_n, num_writers)?;
        Ok(Self {
            base,
            big_n,
            staging,
            scratch: Some(scratch),
        })
    }

    /// Stages the interval `[l, r]` through the first writer.
    pub fn add(&mut self, l: u64, r: u64, payload: T) -> Result<()> {
        self.staging.writers_mut()[0].push(l, r, payload)
    }

    /// The per-producer staging writers; hand one to each producer.
    pub fn writers_mut(&mut self) -> &mut [IntervalWriter<T>] {
        self.staging.writers_mut()
    }

    /// Merges and sorts the staged intervals, builds the node and stop files,
    /// and runs the sweep. The build temporaries are removed however this
    /// ends; `<base>.nodes` and `<base>.stop` persist.
    pub fn index(self) -> Result<ExternalStabbing<T>> {
        let Self {
            base,
            big_n,
            staging,
            scratch,
        } = self;
        let intervals = stage_and_map(&base, staging)?;
        let (mut nodes, mut stop, big_n) = prepare_nodes(&base, &intervals, big_n)?;
        // the staged records are no longer needed once copied into the arena
        drop(intervals);
        sweep_mapped(&base, nodes.as_mut(), stop.as_mut(), big_n)?;
        info!(
            "Indexed {} intervals over [1, {}] at {}",
            nodes.as_ref().len(),
            big_n,
            base.display()
        );
        Ok(ExternalStabbing {
            base,
            big_n,
            nodes,
            stop,
            scratch,
        })
    }
}

/// Merges the staging files into `<base>.intervals`, maps it and sorts the
/// records in place (parallel radix sort, widest-first order).
pub(crate) fn stage_and_map<T: Record>(
    base: &Path,
    staging: Staging<T>,
) -> Result<ScopedMmap<Interval<T>>> {
    let n = staging.merge(&intervals_path(base))?;
    let mut intervals = ScopedMmap::<Interval<T>>::load_mut(intervals_path(base))?;
    ensure!(
        intervals.len() as u64 == n,
        "{} holds {} records, expected {}",
        intervals_path(base).display(),
        intervals.len(),
        n
    );
    info!("Sorting {} staged intervals", n);
    intervals.as_mut().radix_sort_unstable();
    Ok(intervals)
}

/// Creates `<base>.nodes` and `<base>.stop` and copies the sorted intervals
/// into the node arena. With no explicit bound, the domain is the largest
/// right endpoint seen.
pub(crate) fn prepare_nodes<T: Record>(
    base: &Path,
    intervals: &ScopedMmap<Interval<T>>,
    big_n: Option<u64>,
) -> Result<(
    MmapBackend<Node<T>, MmapMut>,
    MmapBackend<NodeRef, MmapMut>,
    u64,
)> {
    let n = intervals.len();
    let big_n = match big_n {
        Some(big_n) => big_n,
        None => intervals
            .as_ref()
            .par_iter()
            .map(|interval| interval.r)
            .max()
            .unwrap_or(0),
    };
    let mut nodes = MmapBackend::<Node<T>, MmapMut>::create(nodes_path(base), n, MmapFlags::SHARED)?;
    nodes
        .as_mut()
        .par_iter_mut()
        .zip(intervals.as_ref().par_iter())
        .for_each(|(node, &interval)| *node = Node::new(interval));
    // a zero-filled stop table is all-null
    let stop = MmapBackend::<NodeRef, MmapMut>::create(
        stop_path(base),
        big_n as usize + 1,
        MmapFlags::SHARED,
    )?;
    Ok((nodes, stop, big_n))
}

/// The sweep over file-backed event lists: slots in `<base>.eventlist`, one
/// bucket per coordinate delimited by the prefix-sum offsets in
/// `<base>.eventlist.layout`. Appending scans the bucket for the first null
/// slot; the open event, when present, is the last occupied slot.
fn sweep_mapped<T: Record>(
    base: &Path,
    nodes: &mut [Node<T>],
    stop: &mut [NodeRef],
    big_n: u64,
) -> Result<()> {
    let n = nodes.len();
    debug_assert_eq!(stop.len(), big_n as usize + 1);

    // two slots per canonical interval
    let mut slots = 0usize;
    for i in 0..n {
        if i == 0 || nodes[i - 1].interval.l != nodes[i].interval.l {
            slots += 2;
        }
    }
    let mut eventlist = ScopedMmap::<NodeRef>::create(eventlist_path(base), slots)?;
    let mut layout = ScopedMmap::<u64>::create(eventlist_layout_path(base), big_n as usize + 2)?;

    // count events per coordinate, linking the smaller chains on the way
    {
        let layout = layout.as_mut();
        for i in 0..n {
            if i > 0 && nodes[i - 1].interval.l == nodes[i].interval.l {
                debug_assert!(nodes[i - 1].interval.r >= nodes[i].interval.r);
                nodes[i - 1].smaller = NodeRef::new(i);
            } else {
                layout[nodes[i].interval.r as usize] += 1;
                layout[nodes[i].interval.l as usize] += 1;
            }
        }
        // turn the counts into offsets: layout[i] = first slot of bucket i
        let mut offset = 0u64;
        for value in layout.iter_mut().take(big_n as usize + 2).skip(1) {
            let count = *value;
            *value = offset;
            offset += count;
        }
        debug_assert_eq!(offset as usize, slots);
    }

    let mut pl = progress_logger!(
        item_name = "interval",
        expected_updates = Some(n),
        display_memory = true
    );
    pl.start("Laying out event lists...");
    {
        let eventlist = eventlist.as_mut();
        let layout = layout.as_ref();
        for i in 0..n {
            if i == 0 || nodes[i - 1].interval.l != nodes[i].interval.l {
                // right event first, so the left event ends up last in its
                // bucket and is popped first by the sweep
                for coord in [nodes[i].interval.r, nodes[i].interval.l] {
                    let mut at = layout[coord as usize] as usize;
                    while !eventlist[at].is_null() {
                        at += 1;
                    }
                    eventlist[at] = NodeRef::new(i);
                }
            }
            pl.light_update();
        }
    }
    pl.done();

    let mut pl = progress_logger!(
        item_name = "coordinate",
        expected_updates = Some(big_n as usize),
        display_memory = true
    );
    pl.start("Building stabbing forest...");
    let mut list = StatusList::new();
    let mut root_rightchild = NodeRef::NULL;
    for i in 1..=big_n {
        let bucket_start = layout.as_ref()[i as usize] as usize;
        let bucket_end = layout.as_ref()[i as usize + 1] as usize;
        let eventlist = eventlist.as_mut();
        let mut end = bucket_end;
        if bucket_end > bucket_start {
            let last = eventlist[bucket_end - 1];
            debug_assert!(!last.is_null());
            if nodes[last.index()].interval.l == i {
                let handle = list.push_back(last);
                nodes[last.index()].p_it = handle as u64 + 1;
                eventlist[bucket_end - 1] = NodeRef::NULL;
                end = bucket_end - 1;
            }
        }
        if let Some(back) = list.back() {
            stop[i as usize] = back;
            for j in (bucket_start..end).rev() {
                let x = eventlist[j];
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
        } else {
            debug_assert_eq!(end, bucket_start);
        }
        pl.light_update();
    }
    pl.done();
    debug_assert!(list.is_empty());
    // dropping the scoped maps unlinks the temporaries
    Ok(())
}

/// The disk-backed Schmidt index. See the [module documentation](self).
#[derive(Debug)]
pub struct ExternalStabbing<T: Record = ()> {
    base: PathBuf,
    big_n: u64,
    nodes: MmapBackend<Node<T>, MmapMut>,
    stop: MmapBackend<NodeRef, MmapMut>,
    scratch: Option<TempDir>,
}

impl<T: Record> ExternalStabbing<T> {
    pub(crate) fn from_parts(
        base: PathBuf,
        big_n: u64,
        nodes: MmapBackend<Node<T>, MmapMut>,
        stop: MmapBackend<NodeRef, MmapMut>,
        scratch: Option<TempDir>,
    ) -> Self {
        Self {
            base,
            big_n,
            nodes,
            stop,
            scratch,
        }
    }

    /// Reopens a persisted index from `<base>.nodes` and `<base>.stop`.
    ///
    /// The interval count and the domain bound are recovered from the file
    /// sizes; queries against the reopened index return exactly what the
    /// builder's index returned.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_owned();
        let nodes = MmapBackend::<Node<T>, MmapMut>::load_mut(nodes_path(&base), MmapFlags::SHARED)?;
        let stop = MmapBackend::<NodeRef, MmapMut>::load_mut(stop_path(&base), MmapFlags::SHARED)?;
        ensure!(
            !stop.as_ref().is_empty(),
            "{} is empty",
            stop_path(&base).display()
        );
        let big_n = stop.as_ref().len() as u64 - 1;
        Ok(Self {
            base,
            big_n,
            nodes,
            stop,
            scratch: None,
        })
    }

    /// The base path of the backing files.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Unmaps and removes the persistent backing files.
    pub fn remove(self) -> Result<()> {
        let Self {
            base,
            nodes,
            stop,
            scratch,
            ..
        } = self;
        drop(nodes);
        drop(stop);
        std::fs::remove_file(nodes_path(&base))
            .with_context(|| format!("Cannot remove {}", nodes_path(&base).display()))?;
        std::fs::remove_file(stop_path(&base))
            .with_context(|| format!("Cannot remove {}", stop_path(&base).display()))?;
        drop(scratch);
        Ok(())
    }
}

impl<T: Record> Stabbing for ExternalStabbing<T> {
    type Payload = T;

    fn num_intervals(&self) -> usize {
        self.nodes.as_ref().len()
    }

    fn domain(&self) -> u64 {
        self.big_n
    }

    fn interval(&self, index: usize) -> &Interval<T> {
        &self.nodes.as_ref()[index].interval
    }

    fn query_into(&self, q: u64, out: &mut Vec<usize>) -> u64 {
        let comparisons = stab_query(self.nodes.as_ref(), self.stop.as_ref(), self.big_n, q, out);
        debug_assert!(verify_query(self.nodes.as_ref(), q, out));
        comparisons
    }

    fn stab_any(&self, q: u64) -> Option<&Interval<T>> {
        stab_any(self.nodes.as_ref(), self.stop.as_ref(), self.big_n, q)
    }
}
