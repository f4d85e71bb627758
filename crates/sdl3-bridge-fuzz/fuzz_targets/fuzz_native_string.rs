#![no_main]
use libfuzzer_sys::fuzz_target;
use sdl3_bridge_abi::ScopedCStr;
use sdl3_bridge_abi::string_abi::from_native;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    match ScopedCStr::new(text) {
        Ok(c) => {
            assert_eq!(c.as_bytes(), data);
            // SAFETY: `c` is alive and NUL-terminated.
            let back = unsafe { from_native(c.as_ptr()) };
            assert_eq!(back.as_deref(), Some(text));
        }
        Err(_) => assert!(data.contains(&0)),
    }
});
