use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration document for one pipeline instance.
///
/// Deserialised from YAML; processing options live at the document root,
/// device and network options in their own sections, and the stage graph as
/// a list. The graph is fixed at start; there is no runtime reconfiguration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub num_local_freq: usize,
    pub num_total_freq: usize,
    pub num_elements: usize,
    pub num_data_sets: usize,
    pub samples_per_data_set: usize,
    pub buffer_depth: usize,
    pub num_gpu_frames: usize,

    /// Correlation triangle block count. Derived from `num_elements` and
    /// `block_size` when absent; validated against the derivation when given.
    #[serde(default)]
    pub num_blocks: Option<usize>,

    /// GPU-native element order → canonical output order.
    pub product_remap: Vec<usize>,

    pub gpu: GpuConfig,
    pub fpga_network: FpgaNetworkConfig,
    #[serde(default)]
    pub gating: GatingConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuConfig {
    pub num_gpus: usize,
    pub block_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FpgaNetworkConfig {
    pub num_links: usize,
    pub link_map: Vec<LinkEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkEntry {
    pub gpu_id: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatingConfig {
    #[serde(default)]
    pub enable_basic_gating: bool,
    #[serde(default = "default_gate_cadence")]
    pub gate_cadence: usize,
    #[serde(default)]
    pub gate_phase: usize,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            enable_basic_gating: false,
            gate_cadence: default_gate_cadence(),
            gate_phase: 0,
        }
    }
}

fn default_gate_cadence() -> usize {
    1
}

/// One stage entry in the graph. `kind` selects the implementation in the
/// stage factory; the remaining fields are wiring and per-kind parameters,
/// validated by the factory for the kinds that need them.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub kind: String,
    pub unique_name: String,

    #[serde(default)]
    pub in_buf: Option<String>,
    /// Per-GPU input rings for the assembler, indexed by GPU id.
    #[serde(default)]
    pub in_bufs: Vec<String>,
    #[serde(default)]
    pub out_buf: Option<String>,
    #[serde(default)]
    pub gate_buf: Option<String>,

    // raw_file_write
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_ext: Option<String>,

    // test_data_gen
    #[serde(default)]
    pub num_frames: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub value: Option<i32>,
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML configuration document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents).context("parsing YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field invariants. Every violation here would otherwise surface
    /// as a deadlock or a mis-sized frame at runtime, so all of them are
    /// fatal before any buffer is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.num_elements == 0
            || self.num_local_freq == 0
            || self.num_data_sets == 0
            || self.samples_per_data_set == 0
            || self.buffer_depth == 0
            || self.num_gpu_frames == 0
        {
            bail!("all cardinalities must be non-zero");
        }
        if self.gpu.num_gpus == 0 {
            bail!("num_gpus must be non-zero");
        }
        if self.product_remap.len() != self.num_elements {
            bail!(
                "product_remap has {} entries, expected num_elements = {}",
                self.product_remap.len(),
                self.num_elements
            );
        }
        let mut seen = vec![false; self.num_elements];
        for &e in &self.product_remap {
            if e >= self.num_elements || seen[e] {
                bail!("product_remap is not a permutation of 0..{}", self.num_elements);
            }
            seen[e] = true;
        }
        if self.fpga_network.link_map.len() != self.fpga_network.num_links {
            bail!(
                "link_map has {} entries, expected num_links = {}",
                self.fpga_network.link_map.len(),
                self.fpga_network.num_links
            );
        }
        for (link_id, entry) in self.fpga_network.link_map.iter().enumerate() {
            if entry.gpu_id >= self.gpu.num_gpus {
                bail!(
                    "link {} maps to gpu {} but num_gpus = {}",
                    link_id,
                    entry.gpu_id,
                    self.gpu.num_gpus
                );
            }
        }
        if self.fpga_network.num_links * self.num_local_freq != self.num_total_freq {
            bail!(
                "num_links ({}) x num_local_freq ({}) must equal num_total_freq ({})",
                self.fpga_network.num_links,
                self.num_local_freq,
                self.num_total_freq
            );
        }
        if self.num_elements > 16 {
            if self.gpu.block_size == 0 || self.num_elements % self.gpu.block_size != 0 {
                bail!(
                    "num_elements ({}) must be a multiple of block_size ({})",
                    self.num_elements,
                    self.gpu.block_size
                );
            }
            let derived = self.derived_num_blocks();
            if let Some(given) = self.num_blocks {
                if given != derived {
                    bail!("num_blocks is {} but derives to {}", given, derived);
                }
            }
        }
        if self.gating.enable_basic_gating {
            if self.gating.gate_cadence == 0 {
                bail!("gate_cadence must be non-zero when gating is enabled");
            }
            if self.gating.gate_cadence >= self.num_gpu_frames {
                bail!(
                    "gate_cadence ({}) must be less than num_gpu_frames ({})",
                    self.gating.gate_cadence,
                    self.num_gpu_frames
                );
            }
            if self.gating.gate_phase > 1 {
                bail!("gate_phase must be 0 or 1");
            }
        }
        Ok(())
    }

    fn derived_num_blocks(&self) -> usize {
        let per_side = self.num_elements / self.gpu.block_size;
        per_side * (per_side + 1) / 2
    }

    /// Correlation triangle block count, derived when not configured.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks.unwrap_or_else(|| self.derived_num_blocks())
    }

    /// Distinct visibilities in the correlation triangle.
    pub fn num_vis(&self) -> usize {
        self.num_elements * (self.num_elements + 1) / 2
    }

    /// Visibilities across the whole band.
    pub fn num_values(&self) -> usize {
        self.num_vis() * self.num_total_freq
    }

    /// Visibilities contributed by one link.
    pub fn num_values_per_link(&self) -> usize {
        self.num_vis() * self.num_local_freq
    }

    /// Bytes of one GPU correlation data set: int32 (real, imag) pairs in
    /// the kernel-native layout. Small arrays come out of the 32-input
    /// kernel as a full matrix; larger ones as packed triangle blocks.
    pub fn gpu_data_set_bytes(&self) -> usize {
        let words = if self.num_elements <= 16 {
            self.num_local_freq * 32 * 32 * 2
        } else {
            self.num_local_freq * self.num_blocks() * self.gpu.block_size * self.gpu.block_size * 2
        };
        words * std::mem::size_of::<i32>()
    }

    /// Bytes of one frame on a per-GPU output ring.
    pub fn gpu_output_frame_bytes(&self) -> usize {
        self.gpu_data_set_bytes() * self.num_data_sets
    }

    /// Bytes of one frame on a per-GPU raw-sample input ring.
    pub fn gpu_input_frame_bytes(&self) -> usize {
        self.samples_per_data_set * self.num_elements * self.num_local_freq * self.num_data_sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> String {
        r#"
num_local_freq: 8
num_total_freq: 16
num_elements: 32
num_data_sets: 1
samples_per_data_set: 32768
buffer_depth: 4
num_gpu_frames: 2
product_remap: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
                16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31]
gpu:
  num_gpus: 2
  block_size: 32
fpga_network:
  num_links: 2
  link_map:
    - gpu_id: 0
    - gpu_id: 1
"#
        .to_string()
    }

    #[test]
    fn parses_and_derives_blocks() {
        let config = Config::from_yaml(&minimal_yaml()).unwrap();
        assert_eq!(config.num_blocks(), 1);
        assert_eq!(config.num_vis(), 32 * 33 / 2);
        assert!(!config.gating.enable_basic_gating);
    }

    #[test]
    fn rejects_bad_remap() {
        let yaml = minimal_yaml().replace("product_remap: [0, 1", "product_remap: [0, 0");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_link_to_missing_gpu() {
        let yaml = minimal_yaml().replace("- gpu_id: 1", "- gpu_id: 7");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_inconsistent_band() {
        let yaml = minimal_yaml().replace("num_total_freq: 16", "num_total_freq: 24");
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
