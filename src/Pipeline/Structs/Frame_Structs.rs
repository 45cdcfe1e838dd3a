// Per-frame metadata records exchanged between pipeline stages

// no atomics in FrameMetadata; keep as plain integral types for ABI

/// Packed stream identifier from the FPGA front end: four 4-bit fields
/// (link, slot, crate, reserved) packed into 16 bits.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedStreamId(pub u16);

impl PackedStreamId {
    pub fn from_fields(link_id: u8, slot_id: u8, crate_id: u8, reserved: u8) -> Self {
        Self(
            (link_id as u16 & 0x000F)
                | ((slot_id as u16 & 0x000F) << 4)
                | ((crate_id as u16 & 0x000F) << 8)
                | ((reserved as u16 & 0x000F) << 12),
        )
    }

    #[inline]
    pub fn link_id(self) -> u8 {
        (self.0 & 0x000F) as u8
    }

    #[inline]
    pub fn slot_id(self) -> u8 {
        ((self.0 & 0x00F0) >> 4) as u8
    }

    #[inline]
    pub fn crate_id(self) -> u8 {
        ((self.0 & 0x0F00) >> 8) as u8
    }

    #[inline]
    pub fn reserved(self) -> u8 {
        ((self.0 & 0xF000) >> 12) as u8
    }
}

/// Wall-clock timestamp of the first packet of a frame, split the way the
/// front-end reports it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl Timeval {
    /// Seconds since the epoch as a float, microsecond resolution.
    pub fn as_seconds(self) -> f64 {
        (self.tv_sec as f64 * 1_000_000.0 + self.tv_usec as f64) / 1_000_000.0
    }
}

/// Packet-loss accounting carried alongside each frame. The FPGA boards
/// report lost time samples per frame; richer per-element counts are not
/// populated by the current front end.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorMatrix {
    pub bad_timesamples: u32,
}

/// Metadata that travels with a frame while it is non-empty. Records live in
/// a fixed pool and are handed between ring buffers by reference count, so
/// this struct stays plain-old-data.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameMetadata {
    /// Monotonic sample counter from the ADC boards; the canonical time axis.
    pub fpga_seq_num: u64,

    /// Arrival time of the first packet of the frame.
    pub first_packet_recv_time: Timeval,

    /// Which FPGA link produced this frame.
    pub stream_id: PackedStreamId,

    /// Loss accounting for the frame.
    pub error_matrix: ErrorMatrix,
}
