#![no_main]

use ember_world::chunk::format::AnvilChunkCodec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = AnvilChunkCodec::parse(data);
});
