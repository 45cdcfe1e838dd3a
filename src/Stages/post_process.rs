// Frame assembler: per-link GPU correlation outputs → integrated visibility
// frames, with optional noise-source ON/OFF gating.

use anyhow::{bail, Result};
use log::info;
use std::sync::Arc;

use super::output_frame::{
    write_description, ComplexInt, GateFrame, PerElementData, PerFrequencyData, VisFrame,
    VisFrameLayout,
};
use super::reshuffle::{
    full_matrix_to_upper_triangle, reorganize_32_to_16_element,
    reorganize_gpu_to_upper_triangle_remap,
};
use crate::Core::config::Config;
use crate::Pipeline::Buffer::registry::BufferRegistry;
use crate::Pipeline::Buffer::Buffer::{ConsumerId, RingBuffer};
use crate::Pipeline::stage::{ShutdownToken, Stage};

/// ADC sample period in microseconds; fixes the wall-clock span of
/// `samples_per_data_set` samples.
const SAMPLE_PERIOD_US: f64 = 2.56;

/// Which accumulator receives the current round when gating routes writes by
/// noise-source step parity.
#[derive(Copy, Clone, PartialEq, Eq)]
enum GateTarget {
    Visibilities,
    Gated,
}

/// Parameters the assembler needs every frame, copied out of the config at
/// construction so the hot loop never touches the document again.
struct AssemblerParams {
    num_elements: usize,
    num_local_freq: usize,
    num_total_freq: usize,
    block_size: usize,
    num_blocks: usize,
    num_data_sets: usize,
    num_gpu_frames: usize,
    samples_per_data_set: usize,
    num_links: usize,
    link_map: Vec<usize>,
    product_remap: Vec<usize>,
    gating_enabled: bool,
    gate_cadence: usize,
    gate_phase: usize,
}

/// The GPU post-process stage.
///
/// Consumes one frame per link per cycle from the per-GPU output rings in a
/// fixed link rotation, reshuffles each data set into canonical product
/// order, integrates `num_gpu_frames` input frames into one output frame and
/// emits it, optionally separating noise-source ON/OFF visibilities into a
/// second ring.
pub struct FrameAssembler {
    unique_name: String,
    params: AssemblerParams,
    in_bufs: Vec<Arc<RingBuffer>>,
    in_ids: Vec<ConsumerId>,
    out_buf: Arc<RingBuffer>,
    gate_buf: Option<Arc<RingBuffer>>,
}

impl FrameAssembler {
    pub fn new(
        config: &Config,
        unique_name: &str,
        registry: &BufferRegistry,
        in_buf_names: &[String],
        out_buf_name: &str,
        gate_buf_name: Option<&str>,
    ) -> Result<Self> {
        if in_buf_names.len() != config.gpu.num_gpus {
            bail!(
                "assembler '{}' wired to {} input rings, expected one per gpu ({})",
                unique_name,
                in_buf_names.len(),
                config.gpu.num_gpus
            );
        }
        let mut in_bufs = Vec::with_capacity(in_buf_names.len());
        for name in in_buf_names {
            in_bufs.push(registry.get(name)?);
        }

        // The per-GPU read cursors advance in lock step, so every input ring
        // must have the same depth and carry the same frame size.
        let depth = in_bufs[0].num_slots();
        let gpu_frame_bytes = config.gpu_output_frame_bytes();
        for buf in &in_bufs {
            if buf.num_slots() != depth {
                bail!(
                    "input ring '{}' has {} slots but '{}' has {}; per-gpu rings must match",
                    buf.name(),
                    buf.num_slots(),
                    in_bufs[0].name(),
                    depth
                );
            }
            if buf.slot_size() != gpu_frame_bytes {
                bail!(
                    "input ring '{}' frames are {} bytes, expected {}",
                    buf.name(),
                    buf.slot_size(),
                    gpu_frame_bytes
                );
            }
        }

        let out_buf = registry.get(out_buf_name)?;
        let layout = VisFrameLayout::new(config.num_elements, config.num_total_freq);
        if out_buf.slot_size() != layout.frame_bytes {
            bail!(
                "output ring '{}' frames are {} bytes, expected {}",
                out_buf.name(),
                out_buf.slot_size(),
                layout.frame_bytes
            );
        }

        let gate_buf = if config.gating.enable_basic_gating {
            let Some(name) = gate_buf_name else {
                bail!("assembler '{}' has gating enabled but no gate_buf", unique_name);
            };
            let buf = registry.get(name)?;
            let expected = GateFrame::frame_bytes(config.num_values());
            if buf.slot_size() != expected {
                bail!(
                    "gate ring '{}' frames are {} bytes, expected {}",
                    buf.name(),
                    buf.slot_size(),
                    expected
                );
            }
            // The gate ring shares the output cursor.
            if buf.num_slots() != out_buf.num_slots() {
                bail!(
                    "gate ring '{}' has {} slots but output ring '{}' has {}",
                    buf.name(),
                    buf.num_slots(),
                    out_buf.name(),
                    out_buf.num_slots()
                );
            }
            Some(buf)
        } else {
            None
        };

        let in_ids = in_bufs
            .iter()
            .map(|buf| buf.register_consumer(unique_name))
            .collect();

        Ok(Self {
            unique_name: unique_name.to_string(),
            params: AssemblerParams {
                num_elements: config.num_elements,
                num_local_freq: config.num_local_freq,
                num_total_freq: config.num_total_freq,
                block_size: config.gpu.block_size,
                num_blocks: config.num_blocks(),
                num_data_sets: config.num_data_sets,
                num_gpu_frames: config.num_gpu_frames,
                samples_per_data_set: config.samples_per_data_set,
                num_links: config.fpga_network.num_links,
                link_map: config
                    .fpga_network
                    .link_map
                    .iter()
                    .map(|entry| entry.gpu_id)
                    .collect(),
                product_remap: config.product_remap.clone(),
                gating_enabled: config.gating.enable_basic_gating,
                gate_cadence: config.gating.gate_cadence,
                gate_phase: config.gating.gate_phase,
            },
            in_bufs,
            in_ids,
            out_buf,
            gate_buf,
        })
    }

    /// Raise EOF on every output ring. Called on all exit paths so
    /// downstream stages always unblock.
    fn finish_outputs(&self) {
        self.out_buf.mark_producer_done();
        if let Some(gate) = &self.gate_buf {
            gate.mark_producer_done();
        }
        info!("closing {}", self.unique_name);
    }
}

impl Stage for FrameAssembler {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn main_thread(&mut self, shutdown: &ShutdownToken) {
        let p = &self.params;
        let num_vis = p.num_elements * (p.num_elements + 1) / 2;
        let num_values = num_vis * p.num_total_freq;
        let num_values_per_link = num_vis * p.num_local_freq;
        let data_set_words = self.in_bufs[0].slot_size() / std::mem::size_of::<i32>()
            / p.num_data_sets;

        // Rotation and integration state.
        let mut use_slot = vec![0usize; self.in_bufs.len()];
        let mut out_slot = 0usize;
        let mut frame_number = 0usize;
        let mut link_id = 0usize;
        let mut target = GateTarget::Visibilities;

        // The output frame under construction and the gated accumulator.
        let mut frame = VisFrame::new(p.num_elements, p.num_total_freq);
        let mut gate = GateFrame::new(num_values);

        // Per-data-set staging, refilled each input frame.
        let mut staged = vec![ComplexInt::default(); p.num_data_sets * num_values];
        let mut local_freq =
            vec![PerFrequencyData::default(); p.num_data_sets * p.num_total_freq];
        let mut local_elem =
            vec![PerElementData::default(); p.num_data_sets * p.num_total_freq * p.num_elements];
        let mut full_scratch = if p.num_elements <= 16 {
            vec![ComplexInt::default(); p.num_local_freq * p.num_elements * p.num_elements]
        } else {
            Vec::new()
        };

        loop {
            if shutdown.is_set() {
                self.finish_outputs();
                return;
            }

            let gpu_id = p.link_map[link_id];
            let in_buf = &self.in_bufs[gpu_id];

            // Blocks until the next frame of this link's rotation is ready.
            let Some(in_slot) =
                in_buf.get_full_from_list(self.in_ids[gpu_id], &[use_slot[gpu_id]])
            else {
                // Producer finished; propagate EOF downstream and exit.
                self.finish_outputs();
                return;
            };

            let fpga_seq_number = in_buf.fpga_seq_num(in_slot);
            let frame_start_time = in_buf.first_packet_recv_time(in_slot);
            let packed_stream_id = in_buf.stream_id(in_slot);
            let error_matrix = in_buf.error_matrix(in_slot);

            // Reshuffle every data set of this frame into its staging region.
            in_buf.frame(in_slot, |bytes| {
                // Safety: slot storage is page-aligned and sized in whole
                // int32 (real, imag) pairs.
                let words = unsafe {
                    std::slice::from_raw_parts(
                        bytes.as_ptr() as *const i32,
                        bytes.len() / std::mem::size_of::<i32>(),
                    )
                };
                for i in 0..p.num_data_sets {
                    let data_set = &words[i * data_set_words..(i + 1) * data_set_words];
                    let region = &mut staged
                        [i * num_values + link_id * num_values_per_link..][..num_values_per_link];
                    if p.num_elements <= 16 {
                        reorganize_32_to_16_element(
                            p.num_local_freq,
                            p.num_elements,
                            data_set,
                            &mut full_scratch,
                            &p.product_remap,
                        );
                        full_matrix_to_upper_triangle(
                            p.num_local_freq,
                            p.num_elements,
                            &full_scratch,
                            region,
                        );
                    } else {
                        reorganize_gpu_to_upper_triangle_remap(
                            p.block_size,
                            p.num_blocks,
                            p.num_local_freq,
                            p.num_elements,
                            data_set,
                            region,
                            &p.product_remap,
                        );
                    }
                }
            });

            // Per-link metadata into the staging tables.
            for i in 0..p.num_data_sets {
                for j in 0..p.num_local_freq {
                    let pos = link_id * p.num_local_freq + j;
                    local_freq[i * p.num_total_freq + pos] = PerFrequencyData {
                        stream_id: packed_stream_id,
                        index: j as u16,
                        // Not yet data-set aware; the front end reports one
                        // count per frame.
                        lost_packet_count: error_matrix.bad_timesamples,
                        rfi_count: 0,
                    };
                    for e in 0..p.num_elements {
                        let pos = link_id * p.num_elements * p.num_local_freq
                            + j * p.num_elements
                            + p.product_remap[e];
                        local_elem[(i * p.num_total_freq * p.num_elements) + pos] =
                            PerElementData::default();
                    }
                }
            }

            // A full set of links has been read; fold this round into the
            // output frame.
            if link_id + 1 == p.num_links {
                // Phase = 0 means the noise source ON bin starts at 0.
                if p.gating_enabled {
                    let integration_num = fpga_seq_number / p.samples_per_data_set as u64;
                    let step =
                        integration_num / p.gate_cadence as u64 + p.gate_phase as u64;
                    target = if step % 2 == 0 {
                        GateTarget::Gated
                    } else {
                        GateTarget::Visibilities
                    };
                }

                for i in 0..p.num_data_sets {
                    let staged_set = &staged[i * num_values..(i + 1) * num_values];

                    if frame_number == 0 {
                        let offset_usec =
                            (i as f64 * (p.samples_per_data_set as f64 * SAMPLE_PERIOD_US)) as i64;
                        {
                            let header = frame.header_mut();
                            header.cpu_timestamp = frame_start_time;
                            header.cpu_timestamp.tv_usec += offset_usec;
                            header.fpga_seq_number =
                                fpga_seq_number + (i * p.samples_per_data_set) as u64;
                            header.num_freq = p.num_total_freq as u32;
                            header.num_vis = num_vis as u32;
                            header.num_elements = p.num_elements as u32;
                            header.num_links = p.num_links as u32;
                        }

                        if p.gating_enabled {
                            let folding_period_us = p.gate_cadence as f64
                                * SAMPLE_PERIOD_US
                                * p.samples_per_data_set as f64;
                            let folding_start_us = frame_start_time.tv_sec as f64
                                * 1_000_000.0
                                + frame_start_time.tv_usec as f64;
                            let gate_header = gate.header_mut();
                            write_description(&mut gate_header.description, "ON - OFF");
                            // Convert to seconds
                            gate_header.folding_period = folding_period_us / 1_000_000.0;
                            gate_header.folding_start = folding_start_us / 1_000_000.0;
                            gate_header.fpga_count_start = fpga_seq_number;
                            gate_header.set_num = 1;
                            gate_header.gate_weight = if p.gate_phase == 0 {
                                [1.0, -1.0]
                            } else {
                                [-1.0, 1.0]
                            };
                            frame.header_mut().num_gates = 1;
                        }

                        let vis = match target {
                            GateTarget::Gated => gate.visibilities_mut(),
                            GateTarget::Visibilities => frame.visibilities_mut(),
                        };
                        vis.copy_from_slice(staged_set);
                        frame.vis_weight_mut().fill(0xFF);
                        frame
                            .frequency_data_mut()
                            .copy_from_slice(&local_freq[i * p.num_total_freq..][..p.num_total_freq]);
                        frame.element_data_mut().copy_from_slice(
                            &local_elem[i * p.num_total_freq * p.num_elements..]
                                [..p.num_total_freq * p.num_elements],
                        );
                    } else if p.gating_enabled && frame_number == p.gate_cadence {
                        // Boundary between the ON and OFF halves; the selected
                        // accumulator restarts instead of accumulating across.
                        let vis = match target {
                            GateTarget::Gated => gate.visibilities_mut(),
                            GateTarget::Visibilities => frame.visibilities_mut(),
                        };
                        vis.copy_from_slice(staged_set);
                        frame.vis_weight_mut().fill(0xFF);
                    } else {
                        let vis = match target {
                            GateTarget::Gated => gate.visibilities_mut(),
                            GateTarget::Visibilities => frame.visibilities_mut(),
                        };
                        for (acc, add) in vis.iter_mut().zip(staged_set) {
                            acc.real += add.real;
                            acc.imag += add.imag;
                        }
                        for (acc, add) in frame
                            .frequency_data_mut()
                            .iter_mut()
                            .zip(&local_freq[i * p.num_total_freq..][..p.num_total_freq])
                        {
                            acc.lost_packet_count += add.lost_packet_count;
                            acc.rfi_count += add.rfi_count;
                        }
                    }

                    // Last frame of the integration: emit.
                    if frame_number + 1 >= p.num_gpu_frames {
                        let (emit_seq, emit_time) = {
                            let header = frame.header();
                            (header.fpga_seq_number, header.cpu_timestamp)
                        };

                        let mut loss_report = String::new();
                        for j in 0..p.num_total_freq / p.num_local_freq {
                            let lost =
                                frame.frequency_data()[j * p.num_local_freq].lost_packet_count;
                            let percent = 100.0 * lost as f32
                                / (p.samples_per_data_set * p.num_gpu_frames) as f32;
                            loss_report.push_str(&format!(" {:.6}%;", percent));
                        }
                        info!("Frame {} loss rates:{}", emit_seq, loss_report);

                        if !self.out_buf.wait_for_empty(out_slot) {
                            self.finish_outputs();
                            return;
                        }
                        if let Some(gate_buf) = &self.gate_buf {
                            if !gate_buf.wait_for_empty(out_slot) {
                                self.finish_outputs();
                                return;
                            }
                        }

                        if let Some(gate_buf) = &self.gate_buf {
                            // The selected accumulator held the ON+OFF running
                            // sum for its rounds; separate in place:
                            //   gated'       = ON - OFF
                            //   visibilities' = ON + OFF
                            let gated = gate.visibilities_mut();
                            let vis = frame.visibilities_mut();
                            for (g, v) in gated.iter_mut().zip(vis.iter_mut()) {
                                g.real -= v.real;
                                g.imag -= v.imag;
                                v.real = g.real + 2 * v.real;
                                v.imag = g.imag + 2 * v.imag;
                            }

                            gate_buf.fill_frame(out_slot, gate.as_bytes());
                            gate_buf.stamp_new_metadata(out_slot, |m| {
                                m.fpga_seq_num = emit_seq;
                                m.first_packet_recv_time = emit_time;
                            });
                            gate_buf.mark_full(out_slot);
                        }

                        self.out_buf.fill_frame(out_slot, frame.as_bytes());
                        self.out_buf.stamp_new_metadata(out_slot, |m| {
                            m.fpga_seq_num = emit_seq;
                            m.first_packet_recv_time = emit_time;
                        });
                        self.out_buf.mark_full(out_slot);

                        out_slot = (out_slot + 1) % self.out_buf.num_slots();
                    }
                }

                frame_number = (frame_number + 1) % p.num_gpu_frames;
            }

            in_buf.release_info(in_slot);
            in_buf.mark_empty(self.in_ids[gpu_id], in_slot);
            use_slot[gpu_id] = (use_slot[gpu_id] + 1) % in_buf.num_slots();

            link_id = (link_id + 1) % p.num_links;
        }
    }
}
