//! End-to-end tests for opening images, listing symbols and validating debug
//! links against files on disk.

mod common;

use common::synth::{SynthElf, SynthSymbol};
use common::{create_temp_file, sample_library, write_file};
use perfcap::debuglink::{self, DebugLinkInfo};
use perfcap::formats::elf::{PF_R, PF_X, PT_LOAD};
use perfcap::image::{BinaryImage, Bitness, ImageError};
use perfcap::symbols::{
    list_symbols, lookup_symbol, resolve_line, SymbolError, SymbolOrigin, SymbolSource,
};

#[test]
fn test_open_library_from_disk() {
    let file = create_temp_file(&sample_library(&[0xde, 0xad, 0xbe, 0xef]));
    let image = BinaryImage::open(file.path()).unwrap();

    assert_eq!(image.bitness(), Bitness::Bits64);
    assert_eq!(image.build_id_hex().as_deref(), Some("deadbeef"));
    assert_eq!(image.soname(), "libsample.so.1");
    assert_eq!(image.load_bias(), Some(0));
    assert_eq!(image.executable_segment_offset(), Some(0));
    assert!(image.has_dynamic_symbols());
    assert!(image.has_full_symbols());
    assert!(!image.has_debug_info());
    assert!(!image.has_debug_link());
}

#[test]
fn test_identity_segment_has_zero_load_bias() {
    // One loadable segment whose vaddr equals its file offset.
    let data = SynthElf::new()
        .segment(PT_LOAD, PF_R | PF_X, 0x1000, 0x1000, 0x1000, 0x1000)
        .min_len(0x2000)
        .build();
    let image = BinaryImage::open_from_buffer("identity.so", data).unwrap();
    assert_eq!(image.load_bias(), Some(0));
}

#[test]
fn test_truncated_files_on_disk() {
    let data = sample_library(&[1, 2, 3, 4]);
    let dir = tempfile::tempdir().unwrap();

    for len in [0, 3, 16, 63, 64, 200, data.len() / 2, data.len() - 1] {
        let path = write_file(dir.path(), &format!("cut-{}.so", len), &data[..len]);
        match BinaryImage::open(&path) {
            Err(ImageError::Truncated { path: p, .. })
            | Err(ImageError::NotAnExecutable { path: p }) => assert_eq!(p, path),
            other => panic!("prefix of {} bytes opened: {:?}", len, other),
        }
    }
}

#[test]
fn test_not_an_executable() {
    let file = create_temp_file(b"#!/bin/sh\necho hello\n");
    assert!(matches!(
        BinaryImage::open(file.path()),
        Err(ImageError::NotAnExecutable { .. })
    ));
}

#[test]
fn test_symbol_listing_and_lookup() {
    let image = BinaryImage::open_from_buffer("libsample.so", sample_library(&[9])).unwrap();

    let full = list_symbols(&image, SymbolSource::Full).unwrap();
    let names: Vec<_> = full.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["work", "helper"]);

    let dynamic = list_symbols(&image, SymbolSource::DynamicOnly).unwrap();
    assert_eq!(dynamic.len(), 1);
    assert_eq!(dynamic[0].origin, SymbolOrigin::DynamicOnly);

    // The full-table record wins the tie at 0x1000.
    let work = lookup_symbol(&image, 0x1000).unwrap().unwrap();
    assert_eq!(work.origin, SymbolOrigin::Full);
    assert_eq!(lookup_symbol(&image, 0x11ff).unwrap().unwrap().name, "work");
    assert_eq!(lookup_symbol(&image, 0x1200).unwrap().unwrap().name, "helper");
    assert!(lookup_symbol(&image, 0x0fff).unwrap().is_none());

    assert_eq!(resolve_line(&image, 0x1000), Err(SymbolError::NoDebugInfo));
}

#[test]
fn test_adjacent_records_split_at_boundary() {
    let data = SynthElf::new()
        .segment(PT_LOAD, PF_R | PF_X, 0, 0, 0x1000, 0x1000)
        .symtab(&[
            SynthSymbol::function("first", 10, 40),
            SynthSymbol::function("second", 50, 50),
        ])
        .build();
    let image = BinaryImage::open_from_buffer("adjacent.so", data).unwrap();

    assert_eq!(lookup_symbol(&image, 49).unwrap().unwrap().name, "first");
    assert_eq!(lookup_symbol(&image, 50).unwrap().unwrap().name, "second");
    assert!(lookup_symbol(&image, 5).unwrap().is_none());
}

#[test]
fn test_debug_link_validation_flow() {
    let dir = tempfile::tempdir().unwrap();
    let companion = sample_library(&[0x42]);
    let companion_path = write_file(dir.path(), "app.debug", &companion);
    let crc = debuglink::compute_checksum(&companion_path).unwrap();
    assert_eq!(crc, crc32fast::hash(&companion));

    let stripped = SynthElf::new()
        .segment(PT_LOAD, PF_R | PF_X, 0, 0, 0x2000, 0x2000)
        .debug_link("app.debug", crc)
        .build();
    let image_path = write_file(dir.path(), "app", &stripped);
    let image = BinaryImage::open(&image_path).unwrap();

    let link = debuglink::get_link_info(&image).unwrap();
    assert_eq!(
        link,
        DebugLinkInfo {
            file_name: "app.debug".to_string(),
            crc
        }
    );
    assert!(debuglink::validate(&companion_path, link.crc));
    assert_eq!(
        debuglink::find_companion(&image_path, &link, &[]),
        Some(companion_path.clone())
    );

    let mut mutated = companion;
    mutated[0x40] ^= 0x80;
    std::fs::write(&companion_path, mutated).unwrap();
    assert!(!debuglink::validate(&companion_path, link.crc));
    assert_eq!(debuglink::find_companion(&image_path, &link, &[]), None);
}

#[test]
fn test_debug_store_directory_lookup() {
    let image_dir = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let companion = b"separate debug info".to_vec();
    let companion_path = write_file(store.path(), "libx.so.debug", &companion);

    let link = DebugLinkInfo {
        file_name: "libx.so.debug".to_string(),
        crc: crc32fast::hash(&companion),
    };
    let image_path = image_dir.path().join("libx.so");
    assert_eq!(
        debuglink::find_companion(&image_path, &link, &[store.path().to_path_buf()]),
        Some(companion_path)
    );
}

#[test]
fn test_image_without_link() {
    let image = BinaryImage::open_from_buffer("plain.so", sample_library(&[1])).unwrap();
    assert_eq!(debuglink::get_link_info(&image), None);
}
