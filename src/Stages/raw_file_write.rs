// Frame sink: drains a ring and writes each frame to a numbered file

use anyhow::Result;
use log::{error, info};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Pipeline::Buffer::registry::BufferRegistry;
use crate::Pipeline::Buffer::Buffer::{ConsumerId, RingBuffer};
use crate::Pipeline::stage::{ShutdownToken, Stage};

/// Writes every frame of a ring to `<base_dir>/<file_name>_NNNNNNN.<ext>`,
/// one file per frame, and exits on EOF.
pub struct RawFileWrite {
    unique_name: String,
    buf: Arc<RingBuffer>,
    consumer_id: ConsumerId,
    base_dir: PathBuf,
    file_name: String,
    file_ext: String,
}

impl RawFileWrite {
    pub fn new(
        unique_name: &str,
        registry: &BufferRegistry,
        in_buf_name: &str,
        base_dir: &str,
        file_name: &str,
        file_ext: &str,
    ) -> Result<Self> {
        let buf = registry.get(in_buf_name)?;
        let consumer_id = buf.register_consumer(unique_name);
        Ok(Self {
            unique_name: unique_name.to_string(),
            buf,
            consumer_id,
            base_dir: PathBuf::from(base_dir),
            file_name: file_name.to_string(),
            file_ext: file_ext.to_string(),
        })
    }

    fn write_frame(&self, path: &PathBuf, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

impl Stage for RawFileWrite {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn main_thread(&mut self, shutdown: &ShutdownToken) {
        let mut slot = 0usize;
        let mut file_num = 0u64;

        loop {
            if shutdown.is_set() {
                break;
            }
            let Some(full_slot) = self.buf.get_full_from_list(self.consumer_id, &[slot]) else {
                break;
            };

            let path = self.base_dir.join(format!(
                "{}_{:07}.{}",
                self.file_name, file_num, self.file_ext
            ));
            let result = self
                .buf
                .frame(full_slot, |bytes| self.write_frame(&path, bytes));
            self.buf.release_info(full_slot);
            self.buf.mark_empty(self.consumer_id, full_slot);

            match result {
                Ok(()) => info!("{}: wrote {}", self.unique_name, path.display()),
                Err(e) => {
                    error!("{}: failed to write {}: {}", self.unique_name, path.display(), e);
                    break;
                }
            }

            slot = (slot + 1) % self.buf.num_slots();
            file_num += 1;
        }

        info!("closing {}", self.unique_name);
    }
}
