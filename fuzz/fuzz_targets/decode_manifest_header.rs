#![no_main]

use libfuzzer_sys::fuzz_target;

// Exercises the manifest header decoder against arbitrary bytes. Must never
// panic or read out of bounds, however the input is truncated or corrupted
// — a malformed version, scheme tag, or length prefix is always
// `PackageError::InvalidData`/`EndOfStream`, never a panic.
fuzz_target!(|data: &[u8]| {
    let mut pos = 0usize;
    let _ = ocpkg_core::wire::read_manifest_header(data, &mut pos);

    let mut cursor = std::io::Cursor::new(data);
    let _ = ocpkg_core::wire::read_manifest_header_from(&mut cursor);
});
