#![no_main]
use libfuzzer_sys::fuzz_target;
use perfcap::image::BinaryImage;
use perfcap::symbols::{list_symbols, lookup_symbol, resolve_line, SymbolSource};

fuzz_target!(|data: &[u8]| {
    let Ok(image) = BinaryImage::open_from_buffer("<fuzz>", data.to_vec()) else {
        return;
    };
    let _ = image.build_id_hex();
    let _ = image.soname();
    let _ = image.debug_link();
    let _ = list_symbols(&image, SymbolSource::Full);
    let _ = list_symbols(&image, SymbolSource::DynamicOnly);
    for address in [0u64, 0x1000, u64::MAX] {
        let _ = lookup_symbol(&image, address);
        let _ = resolve_line(&image, address);
    }
});
