/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The succinct event-list incarnation of the external build.
//!
//! Same staging, node and stop files as [the mapped
//! build](crate::external::ExternalStabbingBuilder), but the transient event
//! list never touches disk: the slots live in a bit-packed
//! [`BitFieldVec`](sux::bits::BitFieldVec) of `⌈log₂(n + 1)⌉`-bit entries and
//! the bucket boundaries in an Elias–Fano sequence with constant-time access,
//! replacing the flat slot file and the `u64` offset table. The algorithmic
//! contract is unchanged: the built index is an ordinary
//! [`ExternalStabbing`].

use super::{prepare_nodes, stage_and_map, Staging};
use crate::external::{ExternalStabbing, IntervalWriter};
use crate::intervals::{Node, NodeRef, Record};
use crate::utils::StatusList;
use anyhow::{Context, Result};
use dsi_progress_logger::prelude::*;
use log::info;
use std::path::{Path, PathBuf};
use sux::prelude::*;
use tempfile::TempDir;

/// The bucket-boundary sequence: an Elias–Fano representation of the
/// prefix-sum offsets with a constant-time select adapter over its high bits.
type EventListOffsets = sux::dict::EliasFano<
    sux::rank_sel::SelectAdaptConst<sux::bits::BitVec<Box<[usize]>>, Box<[usize]>, 12, 4>,
    sux::bits::BitFieldVec<usize, Box<[usize]>>,
>;

/// Ingest staging and build driver producing an [`ExternalStabbing`] through
/// the succinct event list.
#[derive(Debug)]
pub struct SuccinctStabbingBuilder<T: Record = ()> {
    base: PathBuf,
    big_n: Option<u64>,
    staging: Staging<T>,
    scratch: Option<TempDir>,
}

impl<T: Record> SuccinctStabbingBuilder<T> {
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
    /// and runs the sweep over the succinct event list.
    pub fn index(self) -> Result<ExternalStabbing<T>> {
        let Self {
            base,
            big_n,
            staging,
            scratch,
        } = self;
        let intervals = stage_and_map(&base, staging)?;
        let (mut nodes, mut stop, big_n) = prepare_nodes(&base, &intervals, big_n)?;
        drop(intervals);
        sweep_succinct(nodes.as_mut(), stop.as_mut(), big_n);
        info!(
            "Indexed {} intervals over [1, {}] at {} (succinct event list)",
            nodes.as_ref().len(),
            big_n,
            base.display()
        );
        Ok(ExternalStabbing::from_parts(base, big_n, nodes, stop, scratch))
    }
}

fn sweep_succinct<T: Record>(nodes: &mut [Node<T>], stop: &mut [NodeRef], big_n: u64) {
    let n = nodes.len();
    debug_assert_eq!(stop.len(), big_n as usize + 1);

    // count events per coordinate, linking the smaller chains on the way
    let mut counts = vec![0u64; big_n as usize + 2];
    let mut slots = 0usize;
    for i in 0..n {
        if i > 0 && nodes[i - 1].interval.l == nodes[i].interval.l {
            debug_assert!(nodes[i - 1].interval.r >= nodes[i].interval.r);
            nodes[i - 1].smaller = NodeRef::new(i);
        } else {
            counts[nodes[i].interval.r as usize] += 1;
            counts[nodes[i].interval.l as usize] += 1;
            slots += 2;
        }
    }

    // bucket boundaries as an Elias–Fano sequence: offsets[i] is the first
    // slot of coordinate i
    let mut efb = EliasFanoBuilder::new(big_n as usize + 2, slots + 1);
    efb.push(0); // coordinate 0 is unused
    let mut offset = 0usize;
    for &count in counts.iter().take(big_n as usize + 2).skip(1) {
        efb.push(offset);
        offset += count as usize;
    }
    debug_assert_eq!(offset, slots);
    drop(counts);
    let offsets: EventListOffsets =
        unsafe { efb.build().map_high_bits(SelectAdaptConst::<_, _, 12, 4>::new) };

    // bit-packed slots; zero is empty, k names node k - 1
    let width = (usize::BITS - n.leading_zeros()).max(1) as usize;
    let mut eventlist = BitFieldVec::<usize>::new(width, slots);

    let mut pl = progress_logger!(
        item_name = "interval",
        expected_updates = Some(n),
        display_memory = true
    );
    pl.start("Packing event lists...");
    for i in 0..n {
        if i == 0 || nodes[i - 1].interval.l != nodes[i].interval.l {
            // right event first, so the left event ends up last in its bucket
            for coord in [nodes[i].interval.r, nodes[i].interval.l] {
                let mut at = offsets.get(coord as usize);
                while eventlist.get(at) != 0 {
                    at += 1;
                }
                eventlist.set(at, i + 1);
            }
        }
        pl.light_update();
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
        let bucket_start = offsets.get(i as usize);
        let bucket_end = offsets.get(i as usize + 1);
        let mut end = bucket_end;
        if bucket_end > bucket_start {
            let last = eventlist.get(bucket_end - 1);
            debug_assert!(last != 0);
            let last = NodeRef::new(last - 1);
            if nodes[last.index()].interval.l == i {
                let handle = list.push_back(last);
                nodes[last.index()].p_it = handle as u64 + 1;
                eventlist.set(bucket_end - 1, 0);
                end = bucket_end - 1;
            }
        }
        if let Some(back) = list.back() {
            stop[i as usize] = back;
            for j in (bucket_start..end).rev() {
                let x = NodeRef::new(eventlist.get(j) - 1);
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
}
