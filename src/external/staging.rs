/*
 * SPDX-FileCopyrightText: 2023 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Trivially parallel ingest staging.
//!
//! Each producer appends interval records to its own `<base>.tmp_write.<i>`
//! file; nothing is shared, so producers need no synchronization. At indexing
//! time the staging files are merged into `<base>.intervals`: when exactly
//! one writer was used its file is renamed into place, otherwise the files
//! are concatenated in writer order (no ordering is promised across
//! producers; the sort imposes it afterwards).

use crate::intervals::{Interval, Record};
use anyhow::{ensure, Context, Result};
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends `suffix` to a base path, `<base><suffix>`.
pub(crate) fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn tmp_write_path(base: &Path, i: usize) -> PathBuf {
    suffixed(base, &format!(".tmp_write.{}", i))
}

/// The raw bytes of a record; sound by the [`Record`] contract (no padding).
fn record_bytes<W: Record>(record: &W) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            std::ptr::from_ref(record).cast::<u8>(),
            core::mem::size_of::<W>(),
        )
    }
}

/// One producer's staging handle. `Send`, so producers can run on a thread
/// pool; each handle must be used by one producer at a time.
#[derive(Debug)]
pub struct IntervalWriter<T: Record> {
    path: PathBuf,
    writer: BufWriter<File>,
    big_n: Option<u64>,
    count: u64,
    _marker: core::marker::PhantomData<T>,
}

impl<T: Record> IntervalWriter<T> {
    fn create(path: PathBuf, big_n: Option<u64>) -> Result<Self> {
        let file =
            File::create(&path).with_context(|| format!("Cannot create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            big_n,
            count: 0,
            _marker: core::marker::PhantomData,
        })
    }

    /// Stages the interval `[l, r]`.
    pub fn push(&mut self, l: u64, r: u64, payload: T) -> Result<()> {
        ensure!(l >= 1, "left endpoint {} below 1", l);
        ensure!(l <= r, "invalid interval [{}, {}]", l, r);
        if let Some(big_n) = self.big_n {
            ensure!(
                r <= big_n,
                "right endpoint {} beyond the domain bound {}",
                r,
                big_n
            );
        }
        let record = Interval::new(l, r, payload);
        self.writer
            .write_all(record_bytes(&record))
            .with_context(|| format!("Cannot write to {}", self.path.display()))?;
        self.count += 1;
        Ok(())
    }

    /// The number of intervals staged through this writer.
    pub fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Debug)]
pub(crate) struct Staging<T: Record> {
    writers: Vec<IntervalWriter<T>>,
}

impl<T: Record> Staging<T> {
    pub(crate) fn new(base: &Path, big_n: Option<u64>, num_writers: usize) -> Result<Self> {
        ensure!(num_writers >= 1, "at least one staging writer is required");
        let writers = (0..num_writers)
            .map(|i| IntervalWriter::create(tmp_write_path(base, i), big_n))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { writers })
    }

    pub(crate) fn writers_mut(&mut self) -> &mut [IntervalWriter<T>] {
        &mut self.writers
    }

    /// Merges the staging files into `target` and returns the total record
    /// count. Every staging file is gone afterwards.
    pub(crate) fn merge(self, target: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut used = Vec::new();
        for writer in self.writers {
            let IntervalWriter {
                path,
                writer,
                count,
                ..
            } = writer;
            let mut writer = writer;
            writer
                .flush()
                .with_context(|| format!("Cannot flush {}", path.display()))?;
            drop(writer);
            total += count;
            if count > 0 {
                used.push(path);
            } else {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Cannot remove {}", path.display()))?;
            }
        }
        debug!("Merging {} used staging files into {}", used.len(), target.display());
        if used.len() == 1 {
            std::fs::rename(&used[0], target).with_context(|| {
                format!("Cannot rename {} to {}", used[0].display(), target.display())
            })?;
        } else {
            // covers the zero-writer case with an empty record file
            let mut out = BufWriter::new(
                File::create(target)
                    .with_context(|| format!("Cannot create {}", target.display()))?,
            );
            for path in &used {
                let mut file = File::open(path)
                    .with_context(|| format!("Cannot open {}", path.display()))?;
                std::io::copy(&mut file, &mut out)
                    .with_context(|| format!("Cannot append {}", path.display()))?;
                std::fs::remove_file(path)
                    .with_context(|| format!("Cannot remove {}", path.display()))?;
            }
            out.flush()
                .with_context(|| format!("Cannot flush {}", target.display()))?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_endpoints(path: &Path) -> Vec<(u64, u64)> {
        let bytes = std::fs::read(path).unwrap();
        bytes
            .chunks_exact(16)
            .map(|c| {
                (
                    u64::from_ne_bytes(c[..8].try_into().unwrap()),
                    u64::from_ne_bytes(c[8..].try_into().unwrap()),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_writer_renames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("idx");
        let mut staging = Staging::<()>::new(&base, Some(10), 4)?;
        staging.writers_mut()[2].push(1, 5, ())?;
        staging.writers_mut()[2].push(2, 3, ())?;
        let target = suffixed(&base, ".intervals");
        assert_eq!(staging.merge(&target)?, 2);
        assert_eq!(read_endpoints(&target), vec![(1, 5), (2, 3)]);
        for i in 0..4 {
            assert!(!tmp_write_path(&base, i).exists());
        }
        Ok(())
    }

    #[test]
    fn test_multiple_writers_concatenate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("idx");
        let mut staging = Staging::<()>::new(&base, None, 3)?;
        staging.writers_mut()[0].push(4, 4, ())?;
        staging.writers_mut()[2].push(1, 9, ())?;
        staging.writers_mut()[2].push(2, 2, ())?;
        let target = suffixed(&base, ".intervals");
        assert_eq!(staging.merge(&target)?, 3);
        assert_eq!(read_endpoints(&target), vec![(4, 4), (1, 9), (2, 2)]);
        Ok(())
    }

    #[test]
    fn test_no_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("idx");
        let staging = Staging::<()>::new(&base, None, 2)?;
        let target = suffixed(&base, ".intervals");
        assert_eq!(staging.merge(&target)?, 0);
        assert_eq!(std::fs::metadata(&target)?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_validation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("idx");
        let mut staging = Staging::<()>::new(&base, Some(10), 1)?;
        let writer = &mut staging.writers_mut()[0];
        assert!(writer.push(0, 4, ()).is_err());
        assert!(writer.push(5, 4, ()).is_err());
        assert!(writer.push(5, 11, ()).is_err());
        assert!(writer.push(5, 10, ()).is_ok());
        assert_eq!(writer.count(), 1);
        Ok(())
    }
}
