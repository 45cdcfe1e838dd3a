use super::Buffer::RingBuffer;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Name → ring buffer lookup used to wire stages from configuration.
///
/// The pipeline mode owns the buffers (and outlives every stage); the
/// registry is lookup only, so stages hold plain `Arc` clones resolved at
/// build time.
#[derive(Default)]
pub struct BufferRegistry {
    buffers: HashMap<String, Arc<RingBuffer>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer under its own name. Duplicate names are a
    /// configuration error.
    pub fn add(&mut self, buffer: Arc<RingBuffer>) -> Result<()> {
        let name = buffer.name().to_string();
        if self.buffers.contains_key(&name) {
            bail!("duplicate buffer name '{}'", name);
        }
        self.buffers.insert(name, buffer);
        Ok(())
    }

    /// Resolve a configured buffer name.
    pub fn get(&self, name: &str) -> Result<Arc<RingBuffer>> {
        self.buffers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no buffer named '{}' in the registry", name))
    }

    /// All registered buffers, for mode-wide operations (pinning, shutdown).
    pub fn buffers(&self) -> impl Iterator<Item = &Arc<RingBuffer>> {
        self.buffers.values()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
