#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(view) = ember_nbt::read(data, false) {
        let _ = ember_nbt::write(&view, false);
    }
    let _ = ember_nbt::read(data, true);
});
