// Stage factory: configuration document → stage instances

use anyhow::{bail, Context, Result};

use super::stage::{Stage, StageRunner};
use super::Buffer::registry::BufferRegistry;
use crate::Core::config::{Config, StageConfig};
use crate::Stages::post_process::FrameAssembler;
use crate::Stages::raw_file_write::RawFileWrite;
use crate::Stages::test_data_gen::{TestDataGen, TestPattern};

/// Build every stage listed in the configuration, wiring buffers through the
/// registry. Unknown kinds and missing wiring are fatal here, before any
/// thread starts.
pub fn build_stages(config: &Config, registry: &BufferRegistry) -> Result<Vec<StageRunner>> {
    let mut runners = Vec::with_capacity(config.stages.len());
    for stage_config in &config.stages {
        let stage = build_stage(config, stage_config, registry)
            .with_context(|| format!("building stage '{}'", stage_config.unique_name))?;
        runners.push(StageRunner::new(stage));
    }
    Ok(runners)
}

fn build_stage(
    config: &Config,
    sc: &StageConfig,
    registry: &BufferRegistry,
) -> Result<Box<dyn Stage>> {
    match sc.kind.as_str() {
        "gpu_post_process" => {
            let out_buf = sc.out_buf.as_deref().context("gpu_post_process needs out_buf")?;
            Ok(Box::new(FrameAssembler::new(
                config,
                &sc.unique_name,
                registry,
                &sc.in_bufs,
                out_buf,
                sc.gate_buf.as_deref(),
            )?))
        }
        "test_data_gen" => {
            let out_buf = sc.out_buf.as_deref().context("test_data_gen needs out_buf")?;
            let num_frames = sc.num_frames.context("test_data_gen needs num_frames")?;
            let pattern = match sc.pattern.as_deref().unwrap_or("constant") {
                "constant" => TestPattern::Constant(sc.value.unwrap_or(0)),
                "ramp" => TestPattern::Ramp,
                other => bail!("unknown test_data_gen pattern '{}'", other),
            };
            Ok(Box::new(TestDataGen::new(
                config,
                &sc.unique_name,
                registry,
                out_buf,
                num_frames,
                pattern,
            )?))
        }
        "raw_file_write" => {
            let in_buf = sc.in_buf.as_deref().context("raw_file_write needs in_buf")?;
            let base_dir = sc.base_dir.as_deref().context("raw_file_write needs base_dir")?;
            let file_name = sc.file_name.as_deref().context("raw_file_write needs file_name")?;
            let file_ext = sc.file_ext.as_deref().context("raw_file_write needs file_ext")?;
            Ok(Box::new(RawFileWrite::new(
                &sc.unique_name,
                registry,
                in_buf,
                base_dir,
                file_name,
                file_ext,
            )?))
        }
        kind => bail!("unknown stage kind '{}'", kind),
    }
}
