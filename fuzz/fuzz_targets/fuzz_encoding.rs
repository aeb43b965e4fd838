#![no_main]
use libfuzzer_sys::fuzz_target;
use moltshield::encoding::detect_encodings;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let result1 = detect_encodings(s);
        let result2 = detect_encodings(s);
        assert_eq!(
            result1.has_encoding, result2.has_encoding,
            "non-deterministic encoding detection"
        );
        assert_eq!(
            result1.decoded_content, result2.decoded_content,
            "non-deterministic decode path"
        );

        // Idempotence: running the engine on its own output should settle.
        let reencoded = detect_encodings(&result1.decoded_content);
        let _ = reencoded.has_encoding;
    }
});
