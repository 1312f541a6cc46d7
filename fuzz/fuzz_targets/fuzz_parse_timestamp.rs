#![no_main]
use helmi::TimeNormalizer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let normalizer = TimeNormalizer::default();
    if let Ok(instant) = normalizer.parse(text) {
        assert_eq!(instant.timezone(), normalizer.zone());
    }
    let _ = normalizer.normalize(text);
});
