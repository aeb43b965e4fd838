#![no_main]
use libfuzzer_sys::fuzz_target;
use moltshield::exchange::scan_red_flags;

// Guards against catastrophic backtracking and non-determinism in the
// red-flag regex set, which runs on every response before any LLM call.
fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let flags1 = scan_red_flags(s);
        let flags2 = scan_red_flags(s);
        assert_eq!(flags1, flags2, "non-deterministic red flag scan");
    }
});
