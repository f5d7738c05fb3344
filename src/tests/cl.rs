//! Tests that exercise the OpenCL runtime. Each one returns early on
//! machines without a platform so the rest of the suite stays portable.

use std::fs;
use std::path::PathBuf;

use crate::buffer::{Buffer, Residency};
use crate::dims::Dims;
use crate::error::Error;
use crate::graph::Graph;
use crate::plugins::{CollectSink, Frame, MemSource, OpenClTask};
use crate::resources::{Config, ResourceManager};
use crate::sched::Scheduler;

const ZERO_KERNEL: &str = r#"
    __kernel void zero(__global float* input, __global float* output) {
        output[get_global_id(0)] = 0.0f;
    }
"#;

const ADD_ONE_KERNEL: &str = r#"
    __kernel void add_one(__global float* input, __global float* output) {
        size_t gid = get_global_id(0);
        output[gid] = input[gid] + 1.0f;
    }
"#;

fn no_platform() -> bool {
    if ResourceManager::cl_available() {
        false
    } else {
        println!("no OpenCL platform available, skipping");
        true
    }
}

fn write_kernel(name: &str, src: &str) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    fs::write(&path, src).unwrap();
    path
}

#[test]
fn residency_roundtrip_through_the_device() {
    if no_platform() {
        return;
    }
    let resources = ResourceManager::new(Config::default());
    let queue = resources.queue(0).unwrap();

    let mut buf = Buffer::new(Dims::Two(8, 8));
    let data: Vec<f32> = (0..64).map(|i| i as f32).collect();
    buf.set_host_data(&data).unwrap();
    assert_eq!(buf.residency(), Residency::HostValid);

    // Upload, then read back through the device side.
    buf.device_data(&queue).unwrap();
    assert_eq!(buf.residency(), Residency::BothValid);
    buf.device_data_mut(&queue).unwrap();
    assert_eq!(buf.residency(), Residency::DeviceValid);

    assert_eq!(buf.host_data().unwrap(), data.as_slice());
    assert_eq!(buf.residency(), Residency::BothValid);
}

#[test]
fn device_writes_reach_host_reads() {
    // Host frame in, kernel writes zeros on the device, the sink's host
    // read observes the zeros.
    if no_platform() {
        return;
    }
    let path = write_kernel("clflow-test-zero.cl", ZERO_KERNEL);

    let source = MemSource::new(vec![
        Frame::F32(Dims::Two(4, 4), vec![3.0; 16]),
        Frame::F32(Dims::Two(4, 4), vec![7.0; 16]),
    ]);
    let (sink, collected) = CollectSink::new();

    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(source));
    let k = graph.add_task(
        "zero",
        Box::new(OpenClTask::new(path.to_str().unwrap(), "zero", "")),
    );
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, k).unwrap();
    graph.connect(k, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    let frames = collected.lock().unwrap();
    assert_eq!(frames.len(), 2);
    for frame in frames.iter() {
        assert!(frame.data.iter().all(|&v| v == 0.0));
    }
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn kernels_compute_over_uploaded_frames() {
    if no_platform() {
        return;
    }
    let path = write_kernel("clflow-test-add-one.cl", ADD_ONE_KERNEL);

    let source = MemSource::new(vec![Frame::F32(
        Dims::Two(4, 2),
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
    )]);
    let (sink, collected) = CollectSink::new();

    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(source));
    let k = graph.add_task(
        "add-one",
        Box::new(OpenClTask::new(path.to_str().unwrap(), "add_one", "")),
    );
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, k).unwrap();
    graph.connect(k, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    let frames = collected.lock().unwrap();
    assert_eq!(frames[0].data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
}

#[test]
fn programs_compile_once_per_source_and_flags() {
    if no_platform() {
        return;
    }
    let path = write_kernel("clflow-test-cache.cl", ADD_ONE_KERNEL);
    let source = path.to_str().unwrap();
    let resources = ResourceManager::new(Config::default());

    let first = resources.program(source, "").unwrap();
    let second = resources.program(source, "").unwrap();
    assert_eq!(first.as_core().as_ptr(), second.as_core().as_ptr());

    // Kernels from the cached program build independently.
    let kernel_a = resources.kernel(source, "add_one", "", 2).unwrap();
    let kernel_b = resources.kernel(source, "add_one", "", 2).unwrap();
    assert_ne!(kernel_a.as_core().as_ptr(), kernel_b.as_core().as_ptr());
}

#[test]
fn broken_kernels_surface_the_build_log() {
    if no_platform() {
        return;
    }
    let path = write_kernel("clflow-test-broken.cl", "__kernel void broken( {");
    let resources = ResourceManager::new(Config::default());
    match resources.program(path.to_str().unwrap(), "") {
        Err(Error::KernelBuild(log)) => assert!(!log.is_empty()),
        other => panic!("expected KernelBuild, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_kernel_sources_are_reported_by_name() {
    // Runs everywhere: resolution happens before the CL runtime is touched.
    let resources = ResourceManager::new(Config::default());
    match resources.program("no-such-kernel.cl", "") {
        Err(Error::KernelNotFound(name)) => assert_eq!(name, "no-such-kernel.cl"),
        other => panic!("expected KernelNotFound, got {:?}", other.map(|_| ())),
    }
}
