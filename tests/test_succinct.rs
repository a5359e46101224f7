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

fn endpoints(index: &impl Stabbing<Payload = ()>, q: u64) -> Vec<(u64, u64)> {
    index.query(q).iter().map(|i| (i.l, i.r)).collect()
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
    let mut builder = SuccinctStabbingBuilder::<()>::anonymous(Some(5), 1)?;
    builder.add(1, 5, ())?;
    builder.add(2, 3, ())?;
    builder.add(4, 4, ())?;
    let index = builder.index()?;
    assert_eq!(endpoints(&index, 1), vec![(1, 5)]);
    assert_eq!(endpoints(&index, 2), vec![(1, 5), (2, 3)]);
    assert_eq!(endpoints(&index, 3), vec![(1, 5), (2, 3)]);
    assert_eq!(endpoints(&index, 4), vec![(1, 5), (4, 4)]);
    assert_eq!(endpoints(&index, 5), vec![(1, 5)]);
    assert_eq!(endpoints(&index, 6), vec![]);

    let mut builder = SuccinctStabbingBuilder::<()>::anonymous(Some(10), 1)?;
    for (l, r) in [(2, 9), (2, 7), (2, 4)] {
        builder.add(l, r, ())?;
    }
    let index = builder.index()?;
    assert_eq!(endpoints(&index, 5), vec![(2, 9), (2, 7)]);
    assert_eq!(endpoints(&index, 8), vec![(2, 9)]);
    Ok(())
}

#[test]
fn test_matches_mapped_build() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(0x5cc1c7);
    for &(n, big_n, max_len) in &[(500usize, 400u64, 50u64), (3000, 5000, 400)] {
        let intervals = random_intervals(&mut rng, n, big_n, max_len);

        let mut succinct = SuccinctStabbingBuilder::<()>::anonymous(Some(big_n), 2)?;
        let mut mapped = ExternalStabbingBuilder::<()>::anonymous(Some(big_n), 2)?;
        for &(l, r) in &intervals {
            succinct.add(l, r, ())?;
            mapped.add(l, r, ())?;
        }
        let succinct = succinct.index()?;
        let mapped = mapped.index()?;

        let mut a = Vec::new();
        let mut b = Vec::new();
        for q in 1..=big_n + 1 {
            succinct.query_into(q, &mut a);
            mapped.query_into(q, &mut b);
            assert_eq!(a, b, "q = {}", q);
        }
    }
    Ok(())
}

#[test]
fn test_reopen_after_succinct_build() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("idx");
    let mut builder = SuccinctStabbingBuilder::<()>::with_options(&base, Some(30), 1)?;
    builder.add(1, 30, ())?;
    builder.add(10, 20, ())?;
    builder.add(15, 15, ())?;
    let index = builder.index()?;
    let before: Vec<_> = (1..=31).map(|q| endpoints(&index, q)).collect();
    drop(index);

    let reopened = ExternalStabbing::<()>::open(&base)?;
    let after: Vec<_> = (1..=31).map(|q| endpoints(&reopened, q)).collect();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_empty_index() -> Result<()> {
    let index = SuccinctStabbingBuilder::<()>::anonymous(Some(3), 2)?.index()?;
    for q in 1..=4 {
        assert_eq!(endpoints(&index, q), vec![]);
    }
    Ok(())
}
