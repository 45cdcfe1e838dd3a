// Byte-exact layouts of the assembled visibility and gate frames
//
// Downstream consumers parse these frames as raw bytes, so every struct here
// is `#[repr(C)]` with explicit reserved fields in place of what would
// otherwise be implicit padding, and the layout module pins sizes and
// offsets with compile-time asserts (see also tests/layout.rs).

use crate::Pipeline::Buffer::Buffer::FrameStorage;
use crate::Pipeline::Structs::Frame_Structs::{PackedStreamId, Timeval};
use std::mem::size_of;

pub const GIT_HASH_LEN: usize = 64;
pub const MAX_GATE_DESCRIPTION_LEN: usize = 64;

/// Wire protocol revision stamped into every frame header.
pub const DATAPLANE_VERSION: f64 = 0.2;

/// One visibility: int32 real and imaginary accumulators.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ComplexInt {
    pub real: i32,
    pub imag: i32,
}

/// Frame header preceding the visibility block.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct FrameHeader {
    /// Build identifier of the producing binary, NUL-padded.
    pub git_hash: [u8; GIT_HASH_LEN],
    pub version: f64,
    pub cpu_timestamp: Timeval,
    pub fpga_seq_number: u64,
    pub num_freq: u32,
    pub num_vis: u32,
    pub num_elements: u32,
    pub num_links: u32,
    pub num_gates: u32,
    pub reserved: u32,
}

impl Default for FrameHeader {
    fn default() -> Self {
        // Build identifier injected at compile time; falls back to the crate
        // version for builds outside the release pipeline.
        let build = option_env!("VISIPIPE_BUILD_HASH").unwrap_or(env!("CARGO_PKG_VERSION"));
        let mut git_hash = [0; GIT_HASH_LEN];
        let n = build.len().min(GIT_HASH_LEN - 1);
        git_hash[..n].copy_from_slice(&build.as_bytes()[..n]);
        Self {
            git_hash,
            version: DATAPLANE_VERSION,
            cpu_timestamp: Timeval::default(),
            fpga_seq_number: 0,
            num_freq: 0,
            num_vis: 0,
            num_elements: 0,
            num_links: 0,
            num_gates: 0,
            reserved: 0,
        }
    }
}

/// Per-frequency record following the visibility block.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerFrequencyData {
    pub stream_id: PackedStreamId,
    pub index: u16,
    pub lost_packet_count: u32,
    pub rfi_count: u32,
}

/// Per-element record; the front end does not populate these counters yet,
/// so they are emitted as zeros and consumers must tolerate that.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerElementData {
    pub fpga_adc_count: u32,
    pub fpga_fft_count: u32,
    pub fpga_scalar_count: u32,
}

/// Header of a gated-visibility frame.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct GateFrameHeader {
    pub description: [u8; MAX_GATE_DESCRIPTION_LEN],
    /// Noise-source folding period in seconds.
    pub folding_period: f64,
    /// Fold start, seconds since the epoch.
    pub folding_start: f64,
    pub fpga_count_start: u64,
    pub set_num: i32,
    pub reserved: u32,
    pub gate_weight: [f64; 2],
}

impl Default for GateFrameHeader {
    fn default() -> Self {
        Self {
            description: [0; MAX_GATE_DESCRIPTION_LEN],
            folding_period: 0.0,
            folding_start: 0.0,
            fpga_count_start: 0,
            set_num: 0,
            reserved: 0,
            gate_weight: [0.0; 2],
        }
    }
}

// The emitted byte sequence is the contract; pin the record sizes here so a
// refactor cannot silently change them.
const _: () = assert!(size_of::<FrameHeader>() == 120);
const _: () = assert!(size_of::<ComplexInt>() == 8);
const _: () = assert!(size_of::<PerFrequencyData>() == 12);
const _: () = assert!(size_of::<PerElementData>() == 12);
const _: () = assert!(size_of::<GateFrameHeader>() == 112);

/// Copy a description string into a NUL-padded fixed field.
pub fn write_description(dst: &mut [u8; MAX_GATE_DESCRIPTION_LEN], text: &str) {
    dst.fill(0);
    let n = text.len().min(MAX_GATE_DESCRIPTION_LEN - 1);
    dst[..n].copy_from_slice(&text.as_bytes()[..n]);
}

/// Section offsets of an assembled visibility frame:
/// header | visibilities | per-frequency | per-element | weights.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VisFrameLayout {
    pub num_elements: usize,
    pub num_total_freq: usize,
    pub num_vis: usize,
    pub num_values: usize,
    pub vis_offset: usize,
    pub freq_offset: usize,
    pub elem_offset: usize,
    pub weight_offset: usize,
    pub frame_bytes: usize,
}

impl VisFrameLayout {
    pub fn new(num_elements: usize, num_total_freq: usize) -> Self {
        let num_vis = num_elements * (num_elements + 1) / 2;
        let num_values = num_vis * num_total_freq;
        let vis_offset = size_of::<FrameHeader>();
        let freq_offset = vis_offset + num_values * size_of::<ComplexInt>();
        let elem_offset = freq_offset + num_total_freq * size_of::<PerFrequencyData>();
        let weight_offset = elem_offset + num_total_freq * num_elements * size_of::<PerElementData>();
        let frame_bytes = weight_offset + num_values;
        // Every typed section must stay naturally aligned within the frame.
        debug_assert!(vis_offset % 8 == 0 && freq_offset % 4 == 0 && elem_offset % 4 == 0);
        Self {
            num_elements,
            num_total_freq,
            num_vis,
            num_values,
            vis_offset,
            freq_offset,
            elem_offset,
            weight_offset,
            frame_bytes,
        }
    }
}

/// An assembled output frame with typed views into its sections.
///
/// The backing storage is one page-aligned allocation with exactly the wire
/// layout, so emission is a single frame copy into the output ring.
pub struct VisFrame {
    layout: VisFrameLayout,
    bytes: FrameStorage,
}

impl VisFrame {
    pub fn new(num_elements: usize, num_total_freq: usize) -> Self {
        let layout = VisFrameLayout::new(num_elements, num_total_freq);
        let bytes = FrameStorage::new(layout.frame_bytes);
        let mut frame = Self { layout, bytes };
        *frame.header_mut() = FrameHeader::default();
        frame
    }

    pub fn layout(&self) -> &VisFrameLayout {
        &self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        // Safety: the storage is owned by this frame and never shared.
        unsafe { std::slice::from_raw_parts(self.bytes.as_ptr(), self.bytes.len()) }
    }

    pub fn header(&self) -> &FrameHeader {
        // Safety: storage is page-aligned and the header starts at offset 0.
        unsafe { &*(self.bytes.as_ptr() as *const FrameHeader) }
    }

    pub fn header_mut(&mut self) -> &mut FrameHeader {
        // Safety: as above, with exclusive access through &mut self.
        unsafe { &mut *(self.bytes.as_ptr() as *mut FrameHeader) }
    }

    pub fn visibilities(&self) -> &[ComplexInt] {
        unsafe { self.section(self.layout.vis_offset, self.layout.num_values) }
    }

    pub fn visibilities_mut(&mut self) -> &mut [ComplexInt] {
        unsafe { self.section_mut(self.layout.vis_offset, self.layout.num_values) }
    }

    pub fn frequency_data(&self) -> &[PerFrequencyData] {
        unsafe { self.section(self.layout.freq_offset, self.layout.num_total_freq) }
    }

    pub fn frequency_data_mut(&mut self) -> &mut [PerFrequencyData] {
        unsafe { self.section_mut(self.layout.freq_offset, self.layout.num_total_freq) }
    }

    pub fn element_data(&self) -> &[PerElementData] {
        unsafe {
            self.section(
                self.layout.elem_offset,
                self.layout.num_total_freq * self.layout.num_elements,
            )
        }
    }

    pub fn element_data_mut(&mut self) -> &mut [PerElementData] {
        unsafe {
            self.section_mut(
                self.layout.elem_offset,
                self.layout.num_total_freq * self.layout.num_elements,
            )
        }
    }

    pub fn vis_weight(&self) -> &[u8] {
        unsafe { self.section(self.layout.weight_offset, self.layout.num_values) }
    }

    pub fn vis_weight_mut(&mut self) -> &mut [u8] {
        unsafe { self.section_mut(self.layout.weight_offset, self.layout.num_values) }
    }

    /// View `count` records of `T` at `offset`.
    ///
    /// # Safety
    /// `offset` must be one of the layout's section offsets for `T`, which
    /// guarantees alignment and that `count` records fit.
    unsafe fn section<T>(&self, offset: usize, count: usize) -> &[T] {
        std::slice::from_raw_parts(self.bytes.as_ptr().add(offset) as *const T, count)
    }

    /// Mutable variant of [`Self::section`]; same safety contract.
    unsafe fn section_mut<T>(&mut self, offset: usize, count: usize) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.bytes.as_ptr().add(offset) as *mut T, count)
    }
}

/// A gated-visibility frame: gate header followed by the visibility block.
pub struct GateFrame {
    num_values: usize,
    bytes: FrameStorage,
}

impl GateFrame {
    pub fn frame_bytes(num_values: usize) -> usize {
        size_of::<GateFrameHeader>() + num_values * size_of::<ComplexInt>()
    }

    pub fn new(num_values: usize) -> Self {
        let bytes = FrameStorage::new(Self::frame_bytes(num_values));
        let mut frame = Self { num_values, bytes };
        *frame.header_mut() = GateFrameHeader::default();
        frame
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.bytes.as_ptr(), self.bytes.len()) }
    }

    pub fn header(&self) -> &GateFrameHeader {
        // Safety: storage is page-aligned and the header starts at offset 0.
        unsafe { &*(self.bytes.as_ptr() as *const GateFrameHeader) }
    }

    pub fn header_mut(&mut self) -> &mut GateFrameHeader {
        // Safety: as above, with exclusive access through &mut self.
        unsafe { &mut *(self.bytes.as_ptr() as *mut GateFrameHeader) }
    }

    pub fn visibilities(&self) -> &[ComplexInt] {
        // Safety: the visibility block directly follows the 8-aligned header.
        unsafe {
            std::slice::from_raw_parts(
                self.bytes.as_ptr().add(size_of::<GateFrameHeader>()) as *const ComplexInt,
                self.num_values,
            )
        }
    }

    pub fn visibilities_mut(&mut self) -> &mut [ComplexInt] {
        // Safety: as above, with exclusive access through &mut self.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.bytes.as_ptr().add(size_of::<GateFrameHeader>()) as *mut ComplexInt,
                self.num_values,
            )
        }
    }
}
