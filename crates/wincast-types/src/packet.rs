use crate::region::Region;
use crate::window::WindowId;

/// Per-packet annotations the viewer needs to decode correctly: whether
/// this payload is a delta against a previously-stored block, the scaled
/// dimensions if the video pipeline downscaled before encoding, which CSC
/// was applied, and so on. Only the fields relevant to a given encoding are
/// populated; the rest stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOptions {
    /// Set when this payload is an XOR delta against the block stored under
    /// `store`'s sequence number on a previous packet.
    pub delta: Option<u32>,
    /// Set when this payload should be cached for future delta encoding,
    /// carrying the sequence number future deltas will reference.
    pub store: Option<u32>,
    pub quality: Option<u8>,
    pub scaled_size: Option<(u16, u16)>,
    pub csc: Option<String>,
    pub rgb_format: Option<String>,
    /// zlib compression level applied to the payload, if any.
    pub zlib: Option<u8>,
}

/// One outgoing damage packet, ready to be framed and written by the
/// downstream [`crate`]-external packet sink.
#[derive(Debug, Clone)]
pub struct DrawPacket {
    pub window: WindowId,
    pub region: Region,
    pub encoding: String,
    pub payload: Vec<u8>,
    pub packet_sequence: u32,
    pub rowstride: u32,
    pub client_options: ClientOptions,
    /// `(offset, length)` chunks within the connection's shared mmap region
    /// the payload was written to instead of being inlined into `payload`,
    /// for the `"mmap"` pseudo-encoding. Empty for every other encoding.
    pub mmap_chunks: Vec<(u64, u64)>,
}
