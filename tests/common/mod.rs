//! Common test utilities and helpers.
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use crossbeam_channel::Receiver;
use perfcap::capture::{CaptureBatch, ClientCaptureEvent, ThreadName};
use perfcap::formats::elf::{PF_R, PF_W, PF_X, PT_LOAD};
use tempfile::NamedTempFile;

/// Builder for small, well-formed ELF images
#[path = "../../src/formats/elf/synth.rs"]
pub mod synth;

use synth::{SynthElf, SynthSymbol};

/// Creates a temporary file with the given content.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content).expect("Failed to write temp file");
    file.flush().expect("Failed to flush temp file");
    file
}

/// Write `content` to `dir/name` and return the full path
pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write fixture");
    path
}

/// A position-independent library with a code and a data segment and a full
/// symbol table: `work` at 0x1000 (0x200 bytes), `helper` at 0x1200 (0x40 bytes).
pub fn sample_library(build_id: &[u8]) -> Vec<u8> {
    SynthElf::new()
        .segment(PT_LOAD, PF_R | PF_X, 0, 0, 0x2000, 0x2000)
        .segment(PT_LOAD, PF_R | PF_W, 0x2000, 0x3000, 0x80, 0x1000)
        .symtab(&[
            SynthSymbol::function("work", 0x1000, 0x200),
            SynthSymbol::local_function("helper", 0x1200, 0x40),
        ])
        .dynsym(&[SynthSymbol::function("work", 0x1000, 0x200)])
        .build_id(build_id)
        .soname("libsample.so.1")
        .build()
}

/// Thread-name event tagged with its producer and sequence number
pub fn tagged_event(producer: u32, seq: u64) -> ClientCaptureEvent {
    ClientCaptureEvent::ThreadName(ThreadName {
        timestamp_ns: seq,
        pid: 1,
        tid: producer,
        name: format!("p{}-{}", producer, seq),
    })
}

/// (producer, sequence) of an event built by [`tagged_event`]
pub fn tag(event: &ClientCaptureEvent) -> (u32, u64) {
    match event {
        ClientCaptureEvent::ThreadName(t) => (t.tid, t.timestamp_ns),
        other => panic!("unexpected event {:?}", other),
    }
}

/// Every batch received so far
pub fn collect_batches(rx: &Receiver<CaptureBatch>) -> Vec<CaptureBatch> {
    rx.try_iter().collect()
}
