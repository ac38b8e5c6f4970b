//! Capture pipeline tests: batching, shutdown and concurrent producers.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::synth::{SynthElf, SynthSymbol};
use common::{collect_batches, sample_library, tag, tagged_event, write_file};
use perfcap::capture::{
    CaptureError, CaptureEventBuffer, CaptureEventSender, CaptureSession, ChannelSink,
    ClientCaptureEvent, ModuleChange, ModuleUpdate,
};
use perfcap::config::{CaptureConfig, OverflowPolicy, SymbolConfig};
use perfcap::formats::elf::{PF_R, PF_X, PT_LOAD};
use perfcap::resolver::{ModuleResolver, Resolution};

fn config(max_batch_events: usize) -> CaptureConfig {
    CaptureConfig {
        max_batch_events,
        max_batch_latency_ms: 60_000,
        ..CaptureConfig::default()
    }
}

#[test]
fn test_count_threshold_batches() {
    let cfg = config(3);
    let buffer = Arc::new(CaptureEventBuffer::from_config(&cfg));
    let (sink, rx) = ChannelSink::unbounded();
    let mut sender = CaptureEventSender::new(Arc::clone(&buffer), sink, &cfg);
    let now = Instant::now();

    for seq in 0..3 {
        buffer.push(tagged_event(0, seq)).unwrap();
        sender.poll(now).unwrap();
    }
    let batches = collect_batches(&rx);
    assert_eq!(batches.len(), 1);
    let order: Vec<_> = batches[0].iter().map(tag).collect();
    assert_eq!(order, vec![(0, 0), (0, 1), (0, 2)]);

    buffer.push(tagged_event(0, 3)).unwrap();
    sender.poll(now).unwrap();
    assert!(collect_batches(&rx).is_empty());
    assert_eq!(sender.pending(), 1);
}

#[test]
fn test_stop_emits_final_batch() {
    let (sink, rx) = ChannelSink::unbounded();
    let session = CaptureSession::start(&config(100), sink, None).unwrap();
    let producer = session.producer();
    producer.push(tagged_event(0, 0)).unwrap();

    let summary = session.stop().unwrap();
    let batches = collect_batches(&rx);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].iter().map(tag).collect::<Vec<_>>(), vec![(0, 0)]);
    assert_eq!(summary.sender.final_flushes, 1);

    assert!(matches!(
        producer.push(tagged_event(0, 1)),
        Err(CaptureError::Shutdown)
    ));
}

#[test]
fn test_concurrent_producers_delivered_exactly_once() {
    const PRODUCERS: u32 = 8;
    const PER_PRODUCER: u64 = 2_000;

    let cfg = CaptureConfig {
        buffer_capacity: 128,
        overflow_policy: OverflowPolicy::Block,
        push_timeout_ms: 10_000,
        max_batch_events: 97,
        max_batch_latency_ms: 2,
        idle_poll_interval_ms: 1,
        ..CaptureConfig::default()
    };
    let (sink, rx) = ChannelSink::unbounded();
    let session = CaptureSession::start(&cfg, sink, None).unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let producer = session.producer();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    producer.push(tagged_event(p, seq)).unwrap();
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }
    let summary = session.stop().unwrap();

    let batches = collect_batches(&rx);
    for (i, batch) in batches.iter().enumerate() {
        assert_eq!(batch.sequence, i as u64);
        assert!(batch.len() <= 97);
    }

    let mut next: HashMap<u32, u64> = HashMap::new();
    let mut total = 0u64;
    for event in batches.iter().flat_map(|b| b.iter()) {
        let (producer, seq) = tag(event);
        let expected = next.entry(producer).or_insert(0);
        assert_eq!(*expected, seq, "producer {} out of order", producer);
        *expected += 1;
        total += 1;
    }
    assert_eq!(total, PRODUCERS as u64 * PER_PRODUCER);
    assert!(next.values().all(|&n| n == PER_PRODUCER));
    assert_eq!(summary.sender.events_sent, total);
    assert_eq!(summary.buffer.accepted, total);
    assert_eq!(summary.buffer.timed_out, 0);
}

#[test]
fn test_latency_flush_while_running() {
    let cfg = CaptureConfig {
        max_batch_events: 1_000,
        max_batch_latency_ms: 5,
        idle_poll_interval_ms: 5,
        ..CaptureConfig::default()
    };
    let (sink, rx) = ChannelSink::unbounded();
    let session = CaptureSession::start(&cfg, sink, None).unwrap();
    session.push(tagged_event(0, 0)).unwrap();

    let batch = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(batch.iter().map(tag).collect::<Vec<_>>(), vec![(0, 0)]);

    let summary = session.stop().unwrap();
    assert_eq!(summary.sender.deadline_flushes, 1);
    assert_eq!(summary.sender.final_flushes, 0);
}

#[test]
fn test_session_applies_module_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "libsample.so", &sample_library(&[0x11; 20]));
    let base = 0x7f12_3400_0000;

    let resolver = Arc::new(ModuleResolver::new(SymbolConfig {
        debug_directories: Vec::new(),
        ..SymbolConfig::default()
    }));
    let (sink, rx) = ChannelSink::unbounded();
    let session =
        CaptureSession::start(&config(100), sink, Some(Arc::clone(&resolver))).unwrap();

    session
        .push(ClientCaptureEvent::ModuleUpdate(ModuleUpdate {
            timestamp_ns: 1,
            pid: 100,
            change: ModuleChange::Loaded,
            path: path.clone(),
            base,
            build_id: None,
        }))
        .unwrap();
    session.stop().unwrap();

    // The update is still delivered to the sink.
    assert_eq!(collect_batches(&rx).iter().map(|b| b.len()).sum::<usize>(), 1);
    assert_eq!(
        resolver.resolve(base + 0x1010).symbol_name(),
        Some("work")
    );
    assert_eq!(resolver.resolve(base - 1), Resolution::Unresolved);
}

#[test]
fn test_unreadable_module_does_not_block_delivery() {
    let resolver = Arc::new(ModuleResolver::default());
    let (sink, rx) = ChannelSink::unbounded();
    let session = CaptureSession::start(&config(2), sink, Some(Arc::clone(&resolver))).unwrap();

    session
        .push(ClientCaptureEvent::ModuleUpdate(ModuleUpdate {
            timestamp_ns: 1,
            pid: 100,
            change: ModuleChange::Loaded,
            path: "/nonexistent/libgone.so".into(),
            base: 0x1000_0000,
            build_id: None,
        }))
        .unwrap();
    session.push(tagged_event(0, 0)).unwrap();
    session.stop().unwrap();

    assert_eq!(collect_batches(&rx).iter().map(|b| b.len()).sum::<usize>(), 2);
    assert!(resolver.loaded_modules().is_empty());
}

#[test]
fn test_slow_module_load_does_not_delay_batches() {
    let dir = tempfile::tempdir().unwrap();
    let library = SynthElf::new()
        .segment(PT_LOAD, PF_R | PF_X, 0, 0, 0x2000, 0x2000)
        .dynsym(&[SynthSymbol::function("work", 0x1000, 0x200)])
        .debug_link("libslow.so.debug", 0x1234_5678)
        .build();
    let path = write_file(dir.path(), "libslow.so", &library);
    // Sparse, so cheap to create but slow to checksum.
    let companion = std::fs::File::create(dir.path().join("libslow.so.debug")).unwrap();
    companion.set_len(1 << 30).unwrap();
    drop(companion);

    let resolver = Arc::new(ModuleResolver::new(SymbolConfig {
        debug_directories: Vec::new(),
        ..SymbolConfig::default()
    }));
    let cfg = CaptureConfig {
        max_batch_events: 1_000,
        max_batch_latency_ms: 20,
        idle_poll_interval_ms: 5,
        ..CaptureConfig::default()
    };
    let (sink, rx) = ChannelSink::unbounded();
    let session = CaptureSession::start(&cfg, sink, Some(Arc::clone(&resolver))).unwrap();

    let base = 0x7f55_0000_0000;
    let pushed = Instant::now();
    session
        .push(ClientCaptureEvent::ModuleUpdate(ModuleUpdate {
            timestamp_ns: 1,
            pid: 100,
            change: ModuleChange::Loaded,
            path,
            base,
            build_id: None,
        }))
        .unwrap();
    session.push(tagged_event(0, 2)).unwrap();

    let batch = rx.recv_timeout(Duration::from_millis(250)).unwrap();
    assert!(pushed.elapsed() < Duration::from_millis(250));
    assert_eq!(batch.len(), 2);

    // Stopping waits for the load to finish.
    let summary = session.stop().unwrap();
    assert_eq!(summary.sender.deadline_flushes, 1);
    assert_eq!(resolver.resolve(base + 0x1010).symbol_name(), Some("work"));
}
