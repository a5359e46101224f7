/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Result;
use intervalstab::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn build(big_n: u64, intervals: &[(u64, u64)]) -> Result<FastStabbing<()>> {
    let mut builder = FastStabbingBuilder::new(big_n);
    for &(l, r) in intervals {
        builder.add(l, r, ())?;
    }
    builder.build()
}

fn endpoints(index: &impl Stabbing<Payload = ()>, q: u64) -> Vec<(u64, u64)> {
    index.query(q).iter().map(|i| (i.l, i.r)).collect()
}

/// The stabbed set by exhaustive scan, in the Schmidt order (`l` ascending,
/// ties widest first).
fn oracle(intervals: &[(u64, u64)], q: u64) -> Vec<(u64, u64)> {
    let mut hits: Vec<_> = intervals
        .iter()
        .copied()
        .filter(|&(l, r)| l <= q && q <= r)
        .collect();
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    hits
}

fn random_intervals(rng: &mut SmallRng, n: usize, big_n: u64, max_len: u64) -> Vec<(u64, u64)> {
    (0..n)
        .map(|_| {
            let l = rng.random_range(1..=big_n);
            let r = (l + rng.random_range(0..=max_len)).min(big_n);
            (l, r)
        })
        .collect()
}

#[test]
fn test_literal_scenarios() -> Result<()> {
    let index = build(1, &[(1, 1)])?;
    assert_eq!(endpoints(&index, 1), vec![(1, 1)]);
    assert_eq!(endpoints(&index, 2), vec![]);

    let index = build(5, &[(1, 5), (2, 3), (4, 4)])?;
    assert_eq!(endpoints(&index, 1), vec![(1, 5)]);
    assert_eq!(endpoints(&index, 2), vec![(1, 5), (2, 3)]);
    assert_eq!(endpoints(&index, 3), vec![(1, 5), (2, 3)]);
    assert_eq!(endpoints(&index, 4), vec![(1, 5), (4, 4)]);
    assert_eq!(endpoints(&index, 5), vec![(1, 5)]);

    let index = build(10, &[(2, 9), (2, 7), (2, 4)])?;
    assert_eq!(endpoints(&index, 5), vec![(2, 9), (2, 7)]);
    assert_eq!(endpoints(&index, 8), vec![(2, 9)]);

    let index = build(10, &[(1, 10), (3, 3), (5, 5)])?;
    assert_eq!(endpoints(&index, 3), vec![(1, 10), (3, 3)]);
    assert_eq!(endpoints(&index, 4), vec![(1, 10)]);
    assert_eq!(endpoints(&index, 5), vec![(1, 10), (5, 5)]);
    Ok(())
}

#[test]
fn test_idempotent_queries() -> Result<()> {
    let index = build(10, &[(1, 10), (2, 5), (2, 3), (7, 9)])?;
    for q in 1..=11 {
        let first = endpoints(&index, q);
        let second = endpoints(&index, q);
        assert_eq!(first, second);
        let mut reused = vec![42];
        index.query_into(q, &mut reused);
        assert_eq!(reused.len(), first.len());
    }
    Ok(())
}

#[test]
fn test_random_against_oracle() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(0x5abb1e5);
    for &(n, big_n, max_len) in &[(100usize, 50u64, 10u64), (2000, 5000, 200), (3000, 300, 40)] {
        let intervals = random_intervals(&mut rng, n, big_n, max_len);
        let index = build(big_n, &intervals)?;
        for q in 1..=big_n + 1 {
            assert_eq!(endpoints(&index, q), oracle(&intervals, q), "q = {}", q);
        }
    }
    Ok(())
}

#[test]
fn test_bounded_work() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(0xb0bb1e);
    let big_n = 10_000;
    let intervals = random_intervals(&mut rng, 5000, big_n, 300);
    let index = build(big_n, &intervals)?;
    let mut out = Vec::new();
    for q in 1..=big_n {
        let comparisons = index.query_into(q, &mut out);
        assert!(
            comparisons <= 4 * (1 + out.len() as u64),
            "q = {}: {} comparisons for {} results",
            q,
            comparisons,
            out.len()
        );
    }
    Ok(())
}

#[test]
fn test_dense_duplicates() -> Result<()> {
    let mut intervals = Vec::new();
    for _ in 0..5 {
        intervals.extend_from_slice(&[(3, 8), (3, 8), (3, 3), (8, 8), (1, 10)]);
    }
    let index = build(10, &intervals)?;
    for q in 1..=11 {
        assert_eq!(endpoints(&index, q), oracle(&intervals, q), "q = {}", q);
    }
    Ok(())
}

#[test]
fn test_full_cover_and_points() -> Result<()> {
    // every coordinate carries a degenerate interval under a common cover
    let mut intervals = vec![(1, 64)];
    intervals.extend((1..=64).map(|i| (i, i)));
    let index = build(64, &intervals)?;
    for q in 1..=64 {
        assert_eq!(endpoints(&index, q), vec![(1, 64), (q, q)]);
        assert!(index.stab_any(q).unwrap().stabs(q));
    }
    Ok(())
}

#[cfg_attr(not(feature = "slow_tests"), ignore)]
#[test]
fn test_stress() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = SmallRng::seed_from_u64(0x57e55);
    let n = 100_000;
    let big_n = 1_000_000;
    let intervals = random_intervals(&mut rng, n, big_n, 5000);
    let index = build(big_n, &intervals)?;
    for _ in 0..10_000 {
        let q = rng.random_range(1..=big_n);
        assert_eq!(endpoints(&index, q), oracle(&intervals, q), "q = {}", q);
    }
    Ok(())
}
