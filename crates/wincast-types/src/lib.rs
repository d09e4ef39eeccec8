//! Shared data model for the damage pipeline: pixel regions, the
//! polymorphic [`Image`] handle, window identity/capabilities, and the
//! packet-level types that cross the upstream/downstream boundary.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod image;
mod packet;
mod region;
mod window;

pub use image::{HeapImage, Image, PixelFormat};
pub use packet::{ClientOptions, DrawPacket};
pub use window::{DamageSequence, WindowId, WindowTraits};

pub use region::Region;
