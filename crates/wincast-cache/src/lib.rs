//! The delta/XOR still-frame cache ([`DeltaCache`]) and the mmap zero-copy
//! fast path ([`MmapRegion`]).

#![cfg_attr(docsrs, feature(doc_cfg))]

mod delta;
mod error;
mod mmap;

pub use delta::{DeltaCache, DeltaEntry};
pub use error::{CacheError, Result};
pub use mmap::{MmapRegion, MmapWriteError};
