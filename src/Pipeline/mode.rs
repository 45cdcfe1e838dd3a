// Pipeline mode: owns pools, buffers and stages, and their teardown order

use anyhow::Result;
use log::info;
use std::sync::Arc;

use super::factory;
use super::stage::{ShutdownToken, StageRunner};
use super::Buffer::registry::BufferRegistry;
use super::Buffer::Buffer::RingBuffer;
use crate::Core::config::Config;
use crate::Core::device::DeviceContext;
use crate::Core::pool::MetadataPool;
use crate::Stages::output_frame::{GateFrame, VisFrameLayout};

/// Everything one pipeline instance owns.
///
/// Field order is teardown order: stages are joined (and dropped) first,
/// then the device context unpins frame regions, then the buffers and
/// finally the pools are freed.
pub struct PipelineMode {
    stages: Vec<StageRunner>,
    device: DeviceContext,
    registry: BufferRegistry,
    pools: Vec<Arc<MetadataPool>>,
    started: bool,
}

// Manual impl: several owned fields (trait objects, OS thread handles) don't
// implement Debug, so this can't be derived. Test harnesses need `unwrap_err`
// on `Result<PipelineMode, _>`, which requires PipelineMode: Debug.
impl std::fmt::Debug for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMode")
            .field("num_stages", &self.stages.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// `Send + Sync` view of a running mode for signal handlers: requests
/// cooperative stop without owning any of the mode's state.
#[derive(Clone)]
pub struct StopHandle {
    tokens: Vec<ShutdownToken>,
    buffers: Vec<Arc<RingBuffer>>,
}

impl StopHandle {
    pub fn stop(&self) {
        for token in &self.tokens {
            token.request();
        }
        for buffer in &self.buffers {
            buffer.shutdown();
        }
    }
}

impl PipelineMode {
    fn empty(device: DeviceContext) -> Self {
        Self {
            stages: Vec::new(),
            device,
            registry: BufferRegistry::new(),
            pools: Vec::new(),
            started: false,
        }
    }

    pub fn add_metadata_pool(&mut self, pool: Arc<MetadataPool>) {
        self.pools.push(pool);
    }

    /// Register a buffer and hand its slots to the device layer for pinning.
    pub fn add_buffer(&mut self, buffer: Arc<RingBuffer>) -> Result<()> {
        for slot in 0..buffer.num_slots() {
            self.device
                .register_frame_region(buffer.frame_ptr(slot), buffer.slot_size());
        }
        self.registry.add(buffer)
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// Instantiate every configured stage through the factory.
    pub fn initialize_stages(&mut self, config: &Config) -> Result<()> {
        self.stages = factory::build_stages(config, &self.registry)?;
        Ok(())
    }

    pub fn start(&mut self) {
        assert!(!self.started, "pipeline mode started twice");
        self.started = true;
        for runner in &mut self.stages {
            runner.start();
        }
        info!("pipeline started with {} stages", self.stages.len());
    }

    /// Request cooperative shutdown: stage stop flags plus wait cancellation
    /// on every ring. Workers finish the frame in hand and exit.
    pub fn stop(&self) {
        for runner in &self.stages {
            runner.stop();
        }
        for buffer in self.registry.buffers() {
            buffer.shutdown();
        }
    }

    /// Block until every stage worker has exited.
    pub fn join(&mut self) {
        for runner in &mut self.stages {
            runner.join();
        }
        for buffer in self.registry.buffers() {
            info!(
                "ring '{}': {} frames produced, {} consumed",
                buffer.name(),
                buffer.frames_produced(),
                buffer.frames_consumed()
            );
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tokens: self
                .stages
                .iter()
                .map(|runner| runner.shutdown_token())
                .collect(),
            buffers: self.registry.buffers().cloned().collect(),
        }
    }
}

impl Drop for PipelineMode {
    fn drop(&mut self) {
        if self.started {
            self.stop();
            self.join();
        }
    }
}

/// Build the gpu test mode: per-GPU input/output rings sized from the
/// configuration, assembler output rings sized to the wire layout, one
/// shared metadata pool, and the configured stage graph.
pub fn gpu_test_mode(config: &Config) -> Result<PipelineMode> {
    let device = DeviceContext::acquire()?;
    let mut mode = PipelineMode::empty(device);

    // Shared pool of frame metadata records, passed between buffers as
    // frames move through the graph.
    let pool = MetadataPool::create(10 * config.buffer_depth);
    mode.add_metadata_pool(pool.clone());

    for gpu_id in 0..config.gpu.num_gpus {
        mode.add_buffer(RingBuffer::new(
            config.buffer_depth,
            config.gpu_input_frame_bytes(),
            pool.clone(),
            &format!("gpu_input_buffer_{}", gpu_id),
        ))?;
        mode.add_buffer(RingBuffer::new(
            config.buffer_depth,
            config.gpu_output_frame_bytes(),
            pool.clone(),
            &format!("gpu_output_buffer_{}", gpu_id),
        ))?;
    }

    // Assembler output rings are sized by the emitted wire layout.
    let vis_bytes = VisFrameLayout::new(config.num_elements, config.num_total_freq).frame_bytes;
    let gate_bytes = GateFrame::frame_bytes(config.num_values());
    for sc in &config.stages {
        if sc.kind != "gpu_post_process" {
            continue;
        }
        if let Some(name) = &sc.out_buf {
            mode.add_buffer(RingBuffer::new(
                config.buffer_depth,
                vis_bytes,
                pool.clone(),
                name,
            ))?;
        }
        if let Some(name) = &sc.gate_buf {
            mode.add_buffer(RingBuffer::new(
                config.buffer_depth,
                gate_bytes,
                pool.clone(),
                name,
            ))?;
        }
    }

    mode.initialize_stages(config)?;
    Ok(mode)
}
