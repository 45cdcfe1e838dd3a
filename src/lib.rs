// Module naming follows project convention (Pipeline = staged runtime,
// Core = process-wide services, Stages = stage implementations)
#[allow(non_snake_case)]
pub mod Pipeline {
    pub mod Buffer {
        pub mod Buffer;
        pub mod Buffer_impl;
        pub mod registry;
        pub use registry::BufferRegistry;
        pub use Buffer::{ConsumerId, RingBuffer, FRAME_ALIGN}; // re-export for stable path
    }
    pub mod Structs {
        pub mod Frame_Structs;
        pub use Frame_Structs::{ErrorMatrix, FrameMetadata, PackedStreamId, Timeval}; // re-export for stable path
    }
    pub mod factory;
    pub mod mode;
    pub mod stage;

    pub use mode::{gpu_test_mode, PipelineMode, StopHandle};
    pub use stage::{ShutdownToken, Stage, StageRunner};
}

#[allow(non_snake_case)]
pub mod Core {
    pub mod config;
    pub mod device;
    pub mod pool;

    pub use config::Config;
    pub use device::DeviceContext;
    pub use pool::{MetadataPool, MetadataRef};
}

#[allow(non_snake_case)]
pub mod Stages {
    pub mod output_frame;
    pub mod post_process;
    pub mod raw_file_write;
    pub mod reshuffle;
    pub mod test_data_gen;

    pub use post_process::FrameAssembler;
}
