use serial_test::serial;
use std::time::Duration;

use visipipe::Core::config::Config;
use visipipe::Pipeline::mode::gpu_test_mode;
use visipipe::Stages::output_frame::VisFrameLayout;

fn graph_yaml(base_dir: &str, num_frames: usize) -> String {
    let remap: Vec<String> = (0..16).map(|e| e.to_string()).collect();
    format!(
        r#"
num_local_freq: 1
num_total_freq: 1
num_elements: 16
num_data_sets: 1
samples_per_data_set: 512
buffer_depth: 4
num_gpu_frames: 2
product_remap: [{remap}]
gpu:
  num_gpus: 1
  block_size: 32
fpga_network:
  num_links: 1
  link_map:
    - gpu_id: 0
stages:
  - kind: test_data_gen
    unique_name: gen
    out_buf: gpu_output_buffer_0
    num_frames: {num_frames}
    pattern: constant
    value: 1
  - kind: gpu_post_process
    unique_name: vis_assembler
    in_bufs: [gpu_output_buffer_0]
    out_buf: vis_buffer
  - kind: raw_file_write
    unique_name: vis_writer
    in_buf: vis_buffer
    base_dir: "{base_dir}"
    file_name: vis
    file_ext: dat
"#,
        remap = remap.join(", "),
        base_dir = base_dir,
        num_frames = num_frames,
    )
}

// Whole graph from YAML: generator -> assembler -> file writer, draining
// naturally through EOF propagation.
#[test]
#[serial]
fn full_graph_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::from_yaml(&graph_yaml(dir.path().to_str().unwrap(), 4)).unwrap();
    let mut mode = gpu_test_mode(&config).unwrap();
    mode.start();
    mode.join();

    let layout = VisFrameLayout::new(16, 1);
    for output in 0..2 {
        let path = dir.path().join(format!("vis_{:07}.dat", output));
        let bytes = std::fs::read(&path)
            .unwrap_or_else(|_| panic!("missing output file {}", path.display()));
        assert_eq!(bytes.len(), layout.frame_bytes);

        // Two constant-1 frames integrate to real = imag = 2 everywhere.
        let vis = i32::from_le_bytes(
            bytes[layout.vis_offset..layout.vis_offset + 4].try_into().unwrap(),
        );
        assert_eq!(vis, 2);
    }
    assert!(!dir.path().join("vis_0000002.dat").exists());
}

#[test]
#[serial]
fn unknown_stage_kind_is_fatal_at_build() {
    let yaml = graph_yaml("/tmp", 2).replace("kind: raw_file_write", "kind: plot_sink");
    let config = Config::from_yaml(&yaml).unwrap();
    let err = gpu_test_mode(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("unknown stage kind 'plot_sink'"));
}

#[test]
#[serial]
fn missing_buffer_name_is_fatal_at_build() {
    let yaml = graph_yaml("/tmp", 2).replace("in_bufs: [gpu_output_buffer_0]", "in_bufs: [absent_ring]");
    let config = Config::from_yaml(&yaml).unwrap();
    let err = gpu_test_mode(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("absent_ring"));
}

// Cooperative stop: a long-running graph tears down promptly when the stop
// handle cancels the blocking waits.
#[test]
#[serial]
fn stop_handle_interrupts_a_running_graph() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::from_yaml(&graph_yaml(dir.path().to_str().unwrap(), 100_000)).unwrap();
    let mut mode = gpu_test_mode(&config).unwrap();
    mode.start();

    let stop = mode.stop_handle();
    std::thread::sleep(Duration::from_millis(50));
    stop.stop();
    mode.join();
}
