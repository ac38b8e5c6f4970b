#![no_main]
use libfuzzer_sys::fuzz_target;
use perfcap::debuglink::DebugLinkInfo;
use perfcap::formats::elf::ElfData;

fuzz_target!(|data: &[u8]| {
    for endian in [ElfData::Little, ElfData::Big] {
        if let Some(link) = DebugLinkInfo::parse(data, endian) {
            let _ = link.path();
        }
    }
});
