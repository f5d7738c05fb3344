use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::buffer::Depth;
use crate::dims::Dims;
use crate::error::Error;
use crate::graph::Graph;
use crate::plugins::{CollectSink, Frame, MemSource, ReinterpretTask, SinoGenerator};
use crate::resources::{Config, ResourceManager};
use crate::sched::Scheduler;
use crate::tests::{
    first_samples, value_source, CountingId, FailTask, IdTask, InfiniteSource, FAIL_STATUS,
};

#[test]
fn identity_pipeline_delivers_the_source_frame() {
    // A single 2×2 buffer travels source → sink unchanged.
    let source = MemSource::new(vec![Frame::F32(Dims::Two(2, 2), vec![1.0, 2.0, 3.0, 4.0])]);
    let (sink, collected) = CollectSink::new();

    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(source));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    let frames = collected.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dims, Dims::Two(2, 2));
    assert_eq!(frames[0].data, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn reinterpret_filter_widens_8bit_frames() {
    // Bytes [0, 128, 255] come out as normalized floats.
    let source = MemSource::new(vec![Frame::U8(Dims::Two(3, 1), vec![0, 128, 255])]);
    let (sink, collected) = CollectSink::new();

    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(source));
    let r = graph.add_task("reinterpret", Box::new(ReinterpretTask::new(None, true)));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, r).unwrap();
    graph.connect(r, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    let frames = collected.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].depth, Depth::F32);
    let expected = [0.0f32, 128.0 / 255.0, 1.0];
    for (got, want) in frames[0].data.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
    }
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn linear_graphs_preserve_fifo_order() {
    let (sink, collected) = CollectSink::new();
    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(value_source(8)));
    let a = graph.add_task("id-a", Box::new(IdTask::new()));
    let b = graph.add_task("id-b", Box::new(IdTask::new()));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, a).unwrap();
    graph.connect(a, b).unwrap();
    graph.connect(b, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    let frames = collected.lock().unwrap();
    assert_eq!(first_samples(&frames), (0..8).map(|i| i as f32).collect::<Vec<_>>());
}

#[test]
fn source_exhaustion_propagates_and_workers_join() {
    // Three buffers, then every downstream channel closes and run
    // returns (which implies all workers joined).
    let (sink, collected) = CollectSink::new();
    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(value_source(3)));
    let a = graph.add_task("id", Box::new(IdTask::new()));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, a).unwrap();
    graph.connect(a, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    assert_eq!(collected.lock().unwrap().len(), 3);
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn worker_errors_surface_and_leak_nothing() {
    // The filter fails on its second invocation; the run reports the
    // device error, the sink sees at most one frame, nothing leaks.
    let (sink, collected) = CollectSink::new();
    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(value_source(5)));
    let f = graph.add_task("fail", Box::new(FailTask::new(2)));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, f).unwrap();
    graph.connect(f, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    let err = Scheduler::new(graph, &resources).run().unwrap_err();
    assert!(matches!(err, Error::Cl(code) if code == FAIL_STATUS));

    assert!(collected.lock().unwrap().len() <= 1);
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn finalize_runs_exactly_once_per_task() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let (sink, _collected) = CollectSink::new();
    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(value_source(4)));
    let a = graph.add_task("count-a", Box::new(CountingId::new(finalized.clone())));
    let b = graph.add_task("count-b", Box::new(CountingId::new(finalized.clone())));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, a).unwrap();
    graph.connect(a, b).unwrap();
    graph.connect(b, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();
    assert_eq!(finalized.load(Ordering::SeqCst), 2);
}

#[test]
fn cancellation_terminates_an_endless_stream() {
    let (sink, collected) = CollectSink::new();
    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(InfiniteSource::new(Dims::Two(2, 2))));
    let a = graph.add_task("id", Box::new(IdTask::new()));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, a).unwrap();
    graph.connect(a, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    let scheduler = Scheduler::new(graph, &resources);
    let handle = scheduler.handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.cancel();
    });

    scheduler.run().unwrap();
    canceller.join().unwrap();

    assert!(!collected.lock().unwrap().is_empty());
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn reductor_flushes_after_the_stream_ends() {
    // Four 3×2 projections become two 3×4 sinograms: sinogram `i` holds
    // row `i` of every projection, in arrival order.
    let dims = Dims::Two(3, 2);
    let frames = (0..4)
        .map(|p| Frame::F32(dims, (0..6).map(|k| (p * 6 + k) as f32).collect()))
        .collect();
    let (sink, collected) = CollectSink::new();

    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(MemSource::new(frames)));
    let g = graph.add_task("sino", Box::new(SinoGenerator::new(0)));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, g).unwrap();
    graph.connect(g, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    Scheduler::new(graph, &resources).run().unwrap();

    let frames = collected.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].dims, Dims::Two(3, 4));
    assert_eq!(
        frames[0].data,
        vec![0.0, 1.0, 2.0, 6.0, 7.0, 8.0, 12.0, 13.0, 14.0, 18.0, 19.0, 20.0]
    );
    assert_eq!(
        frames[1].data,
        vec![3.0, 4.0, 5.0, 9.0, 10.0, 11.0, 15.0, 16.0, 17.0, 21.0, 22.0, 23.0]
    );
    assert_eq!(resources.in_use_count(), 0);
}

#[test]
fn profiler_accumulates_per_task_timings() {
    use crate::profiler::Profiler;

    let (sink, _collected) = CollectSink::new();
    let mut graph = Graph::new();
    let s = graph.add_task("source", Box::new(value_source(4)));
    let t = graph.add_task("sink", Box::new(sink));
    graph.connect(s, t).unwrap();

    let resources = ResourceManager::new(Config::default());
    let profiler = Arc::new(Profiler::new(true));
    let mut scheduler = Scheduler::new(graph, &resources);
    scheduler.set_profiler(profiler.clone());
    scheduler.run().unwrap();

    let report = profiler.report();
    let names: Vec<&str> = report.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"source"));
    assert!(names.contains(&"sink"));
    // Four frames, plus the generate call that reports exhaustion.
    let source_entry = report.iter().find(|e| e.name == "source").unwrap();
    assert_eq!(source_entry.calls, 5);
}
