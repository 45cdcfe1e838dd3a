// Synthetic GPU-frame source for test graphs and bench runs

use anyhow::{bail, Result};
use log::info;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Core::config::Config;
use crate::Pipeline::Buffer::registry::BufferRegistry;
use crate::Pipeline::Buffer::Buffer::RingBuffer;
use crate::Pipeline::stage::{ShutdownToken, Stage};
use crate::Pipeline::Structs::Frame_Structs::Timeval;

/// Payload patterns the generator can produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TestPattern {
    /// Every int32 word set to the same value.
    Constant(i32),
    /// Word `k` of frame `n` set to `n + k`, wrapping.
    Ramp,
}

/// Fills a ring with synthetic frames and stamps plausible metadata, then
/// raises EOF. Stands in for the NIC/GPU chain in test graphs.
pub struct TestDataGen {
    unique_name: String,
    out_buf: Arc<RingBuffer>,
    num_frames: usize,
    pattern: TestPattern,
    /// FPGA sequence advance per generated frame.
    seq_step: u64,
}

impl TestDataGen {
    pub fn new(
        config: &Config,
        unique_name: &str,
        registry: &BufferRegistry,
        out_buf_name: &str,
        num_frames: usize,
        pattern: TestPattern,
    ) -> Result<Self> {
        if num_frames == 0 {
            bail!("generator '{}' configured for zero frames", unique_name);
        }
        let out_buf = registry.get(out_buf_name)?;
        Ok(Self {
            unique_name: unique_name.to_string(),
            out_buf,
            num_frames,
            pattern,
            seq_step: (config.samples_per_data_set * config.num_data_sets) as u64,
        })
    }
}

impl Stage for TestDataGen {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn main_thread(&mut self, shutdown: &ShutdownToken) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let start_time = Timeval {
            tv_sec: now.as_secs() as i64,
            tv_usec: now.subsec_micros() as i64,
        };

        for frame_idx in 0..self.num_frames {
            if shutdown.is_set() {
                break;
            }
            let slot = frame_idx % self.out_buf.num_slots();
            if !self.out_buf.wait_for_empty(slot) {
                break;
            }

            self.out_buf.frame_mut(slot, |bytes| {
                // Safety: slot storage is page-aligned and a whole number of
                // int32 words.
                let words = unsafe {
                    std::slice::from_raw_parts_mut(
                        bytes.as_mut_ptr() as *mut i32,
                        bytes.len() / std::mem::size_of::<i32>(),
                    )
                };
                match self.pattern {
                    TestPattern::Constant(value) => words.fill(value),
                    TestPattern::Ramp => {
                        for (k, word) in words.iter_mut().enumerate() {
                            *word = (frame_idx as i32).wrapping_add(k as i32);
                        }
                    }
                }
            });

            self.out_buf.stamp_new_metadata(slot, |m| {
                m.fpga_seq_num = frame_idx as u64 * self.seq_step;
                m.first_packet_recv_time = start_time;
            });
            self.out_buf.mark_full(slot);
        }

        self.out_buf.mark_producer_done();
        info!(
            "{}: generated {} frames",
            self.unique_name, self.num_frames
        );
    }
}
