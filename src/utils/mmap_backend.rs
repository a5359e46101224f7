/*
 * SPDX-FileCopyrightText: 2023 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::intervals::Record;
use anyhow::{ensure, Context, Result};
use log::warn;
use mmap_rs::{Mmap, MmapFlags, MmapMut};
use std::path::{Path, PathBuf};

/// Exposes a fixed-record file as a typed slice through a memory mapping.
///
/// This is how the external incarnations keep their large arrays on disk: a
/// file holding `len` contiguous `W` records is mapped and reinterpreted as
/// `&[W]` (or `&mut [W]` when mapped mutably). The [`Record`] contract makes
/// the reinterpretation sound: no padding, any bit pattern valid.
///
/// Zero-length files are handled without a mapping, since an empty mapping
/// cannot be created.
pub struct MmapBackend<W: Record, M = Mmap> {
    mmap: Option<M>,
    len: usize,
    _marker: core::marker::PhantomData<W>,
}

impl<W: Record, M> core::fmt::Debug for MmapBackend<W, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmapBackend")
            .field("len", &self.len)
            .finish()
    }
}

fn record_count<W>(path: &Path) -> Result<usize> {
    let file_len = path
        .metadata()
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .len() as usize;
    let size = core::mem::size_of::<W>();
    ensure!(
        size == 0 || file_len % size == 0,
        "{} does not hold a whole number of {}-byte records (size {})",
        path.display(),
        size,
        file_len
    );
    Ok(file_len / size.max(1))
}

impl<W: Record> MmapBackend<W> {
    /// Maps an existing record file read-only.
    pub fn load<P: AsRef<Path>>(path: P, flags: MmapFlags) -> Result<Self> {
        let path = path.as_ref();
        let len = record_count::<W>(path)?;
        if len == 0 {
            return Ok(Self {
                mmap: None,
                len: 0,
                _marker: core::marker::PhantomData,
            });
        }
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open {}", path.display()))?;
        let mmap = unsafe {
            mmap_rs::MmapOptions::new(len * core::mem::size_of::<W>())
                .with_context(|| format!("Cannot initialize mmap for {}", path.display()))?
                .with_flags(flags)
                .with_file(&file, 0)
                .map()
                .with_context(|| format!("Cannot mmap {}", path.display()))?
        };
        Ok(Self {
            mmap: Some(mmap),
            len,
            _marker: core::marker::PhantomData,
        })
    }
}

impl<W: Record> MmapBackend<W, MmapMut> {
    /// Maps an existing record file mutably.
    pub fn load_mut<P: AsRef<Path>>(path: P, flags: MmapFlags) -> Result<Self> {
        let path = path.as_ref();
        let len = record_count::<W>(path)?;
        if len == 0 {
            return Ok(Self {
                mmap: None,
                len: 0,
                _marker: core::marker::PhantomData,
            });
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Cannot open {} for writing", path.display()))?;
        let mmap = unsafe {
            mmap_rs::MmapOptions::new(len * core::mem::size_of::<W>())
                .with_context(|| format!("Cannot initialize mmap for {}", path.display()))?
                .with_flags(flags)
                .with_file(&file, 0)
                .map_mut()
                .with_context(|| format!("Cannot mutably mmap {}", path.display()))?
        };
        Ok(Self {
            mmap: Some(mmap),
            len,
            _marker: core::marker::PhantomData,
        })
    }

    /// Creates (or truncates) a file holding `len` zero-filled records and
    /// maps it mutably. A zero-filled record is all-null: a fresh file needs
    /// no initialization pass.
    pub fn create<P: AsRef<Path>>(path: P, len: usize, flags: MmapFlags) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Cannot create {}", path.display()))?;
        file.set_len((len * core::mem::size_of::<W>()) as u64)
            .with_context(|| format!("Cannot extend {} to {} records", path.display(), len))?;
        drop(file);
        Self::load_mut(path, flags)
    }
}

impl<W: Record> AsRef<[W]> for MmapBackend<W> {
    fn as_ref(&self) -> &[W] {
        match &self.mmap {
            None => &[],
            Some(mmap) => unsafe {
                std::slice::from_raw_parts(mmap.as_ptr() as *const W, self.len)
            },
        }
    }
}

impl<W: Record> AsRef<[W]> for MmapBackend<W, MmapMut> {
    fn as_ref(&self) -> &[W] {
        match &self.mmap {
            None => &[],
            Some(mmap) => unsafe {
                std::slice::from_raw_parts(mmap.as_ptr() as *const W, self.len)
            },
        }
    }
}

impl<W: Record> AsMut<[W]> for MmapBackend<W, MmapMut> {
    fn as_mut(&mut self) -> &mut [W] {
        match &mut self.mmap {
            None => &mut [],
            Some(mmap) => unsafe {
                std::slice::from_raw_parts_mut(mmap.as_mut_ptr() as *mut W, self.len)
            },
        }
    }
}

/// A mutable record mapping whose backing file is unlinked when the value is
/// dropped.
///
/// The sweep's temporaries (the staged intervals, the event list and its
/// layout) go through this wrapper, so they are guaranteed to be unmapped and
/// removed however the build ends.
pub struct ScopedMmap<W: Record> {
    backend: Option<MmapBackend<W, MmapMut>>,
    path: PathBuf,
}

impl<W: Record> ScopedMmap<W> {
    /// Creates a zero-filled scoped record file of `len` records.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let backend = MmapBackend::create(&path, len, MmapFlags::SHARED)?;
        Ok(Self {
            backend: Some(backend),
            path,
        })
    }

    /// Maps an existing file, taking ownership of it.
    pub fn load_mut<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let backend = MmapBackend::load_mut(&path, MmapFlags::SHARED)?;
        Ok(Self {
            backend: Some(backend),
            path,
        })
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<W: Record> AsRef<[W]> for ScopedMmap<W> {
    fn as_ref(&self) -> &[W] {
        self.backend.as_ref().map(|b| b.as_ref()).unwrap_or(&[])
    }
}

impl<W: Record> AsMut<[W]> for ScopedMmap<W> {
    fn as_mut(&mut self) -> &mut [W] {
        self.backend.as_mut().map(|b| b.as_mut()).unwrap_or(&mut [])
    }
}

impl<W: Record> Drop for ScopedMmap<W> {
    fn drop(&mut self) {
        // unmap before unlinking
        drop(self.backend.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Cannot remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("records");

        let mut backend = MmapBackend::<u64, MmapMut>::create(&path, 4, MmapFlags::SHARED)?;
        assert_eq!(backend.as_ref(), &[0, 0, 0, 0]);
        backend.as_mut()[1] = 42;
        backend.as_mut()[3] = u64::MAX;
        drop(backend);

        let reloaded = MmapBackend::<u64>::load(&path, MmapFlags::SHARED)?;
        assert_eq!(reloaded.as_ref(), &[0, 42, 0, u64::MAX]);
        Ok(())
    }

    #[test]
    fn test_empty_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        let backend = MmapBackend::<u64, MmapMut>::create(&path, 0, MmapFlags::SHARED)?;
        assert!(backend.as_ref().is_empty());
        Ok(())
    }

    #[test]
    fn test_scoped_unlinks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scratch");
        {
            let mut scoped = ScopedMmap::<u64>::create(&path, 2)?;
            scoped.as_mut()[0] = 1;
            assert!(path.exists());
        }
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_ragged_file_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ragged");
        std::fs::write(&path, [0u8; 12])?;
        assert!(MmapBackend::<u64>::load(&path, MmapFlags::SHARED).is_err());
        Ok(())
    }
}
