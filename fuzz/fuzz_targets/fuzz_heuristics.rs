#![no_main]
use libfuzzer_sys::fuzz_target;
use moltshield::heuristics::score;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let result1 = score(s);
        let result2 = score(s);
        assert_eq!(result1.score, result2.score, "non-deterministic heuristic score");
        assert_eq!(result1.hits.len(), result2.hits.len(), "non-deterministic hit count");
        for hit in &result1.hits {
            assert!(hit.start <= hit.end);
            assert!(hit.end <= s.len());
        }
    }
});
