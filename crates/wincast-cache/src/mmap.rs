use std::num::NonZeroUsize;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MmapWriteError {
    #[error("payload of {requested} bytes does not fit in a {capacity}-byte mmap region")]
    TooLarge { requested: usize, capacity: usize },
}

enum Backing {
    /// Real shared memory, mapped from a file descriptor supplied by the
    /// viewer at connection setup.
    Mapped { ptr: NonNull<u8>, len: usize },
    /// A heap buffer standing in for shared memory, used when no mmap fd is
    /// available (tests, or a viewer that didn't negotiate mmap).
    Owned(Box<[u8]>),
}

// SAFETY: the mapped memory is exclusively owned by this `MmapRegion` for
// writes (the region is a single ring the viewer only reads from after a
// packet announces a byte range as ready), so sending it across threads is
// sound as long as access stays serialized by the owning type's `&mut self`.
unsafe impl Send for Backing {}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped { ptr, len } => {
                // SAFETY: `ptr` was produced by a successful `mmap` of `len`
                // bytes and is not unmapped until `Drop`.
                unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) }
            }
            Backing::Owned(buf) => buf,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Mapped { ptr, len } => {
                // SAFETY: see `as_slice`; exclusive access is guaranteed by
                // `&mut self`.
                unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), *len) }
            }
            Backing::Owned(buf) => buf,
        }
    }

    fn len(&self) -> usize {
        match self {
            Backing::Mapped { len, .. } => *len,
            Backing::Owned(buf) => buf.len(),
        }
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        if let Backing::Mapped { ptr, len } = self {
            // SAFETY: `ptr`/`len` describe the exact mapping created in
            // `MmapRegion::from_fd` and are not used again after this call.
            if let Err(err) = unsafe { munmap(ptr.cast(), *len) } {
                warn!(%err, "failed to munmap shared memory region");
            }
        }
    }
}

/// A shared-memory ring co-owned with the viewer: pixels are written here
/// instead of into a packet payload, and the packet instead carries the
/// byte ranges the viewer should read.
pub struct MmapRegion {
    backing: Backing,
    offset: usize,
}

impl MmapRegion {
    /// Maps `size` bytes of `fd` for read/write, shared with whatever other
    /// process holds the other end (the viewer).
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open file descriptor referring to memory the
    /// caller is authorized to map read/write and shared (typically a
    /// `memfd` the viewer handed over during connection setup).
    pub unsafe fn from_fd(fd: RawFd, size: usize) -> Result<Self, nix::Error> {
        let len = NonZeroUsize::new(size).ok_or(nix::Error::EINVAL)?;
        // SAFETY: caller guarantees `fd` is a valid shared-memory descriptor
        // of at least `size` bytes; `ptr` is dropped via `munmap` in
        // `Backing::drop`.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )?
        };
        Ok(Self {
            backing: Backing::Mapped {
                ptr: ptr.cast(),
                len: size,
            },
            offset: 0,
        })
    }

    /// An in-process region backed by a heap buffer, for callers that have
    /// no real mmap fd (tests, or a connection that didn't negotiate mmap).
    #[must_use]
    pub fn in_memory(size: usize) -> Self {
        Self {
            backing: Backing::Owned(vec![0u8; size].into_boxed_slice()),
            offset: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.backing.len()
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Writes `data` into the ring starting at the current offset, wrapping
    /// around if it doesn't fit before the end, and advances the offset.
    /// Returns the `(offset, len)` chunks written, in order, for the caller
    /// to put into the outgoing packet's client options. Fails only if
    /// `data` is larger than the whole region.
    pub fn write(&mut self, data: &[u8]) -> Result<Vec<(u64, u64)>, MmapWriteError> {
        let capacity = self.backing.len();
        if data.len() > capacity {
            return Err(MmapWriteError::TooLarge {
                requested: data.len(),
                capacity,
            });
        }
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.offset;
        let first_len = data.len().min(capacity - start);
        let dst = self.backing.as_mut_slice();
        dst[start..start + first_len].copy_from_slice(&data[..first_len]);

        let mut chunks = vec![(start as u64, first_len as u64)];
        let remaining = data.len() - first_len;
        if remaining > 0 {
            dst[..remaining].copy_from_slice(&data[first_len..]);
            chunks.push((0, remaining as u64));
        }

        self.offset = (start + data.len()) % capacity;
        Ok(chunks)
    }

    /// Reads back the bytes written at `(offset, len)`, for tests and
    /// diagnostics; the viewer performs the equivalent read on its side of
    /// the shared mapping.
    #[must_use]
    pub fn read(&self, offset: u64, len: u64) -> &[u8] {
        let start = offset as usize;
        let end = start + len as usize;
        &self.backing.as_slice()[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_without_wraparound() {
        let mut region = MmapRegion::in_memory(16);
        let chunks = region.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(chunks, vec![(0, 4)]);
        assert_eq!(region.offset(), 4);
        assert_eq!(region.read(0, 4), &[1, 2, 3, 4]);
    }

    #[test]
    fn write_wraps_around_the_ring() {
        let mut region = MmapRegion::in_memory(8);
        region.write(&[0; 6]).unwrap();
        assert_eq!(region.offset(), 6);
        let chunks = region.write(&[9, 9, 9, 9]).unwrap();
        assert_eq!(chunks, vec![(6, 2), (0, 2)]);
        assert_eq!(region.offset(), 2);
    }

    #[test]
    fn oversized_write_is_rejected() {
        let mut region = MmapRegion::in_memory(4);
        assert!(region.write(&[0; 5]).is_err());
    }

    #[test]
    fn oversized_write_leaves_region_reusable() {
        let mut region = MmapRegion::in_memory(4);
        assert!(region.write(&[0; 5]).is_err());
        // A failed write must not have advanced the offset or corrupted
        // the region's reclaim state - the caller falls back to normal
        // encoding and the mmap path must still work next time.
        let chunks = region.write(&[7, 7]).unwrap();
        assert_eq!(chunks, vec![(0, 2)]);
    }
}
