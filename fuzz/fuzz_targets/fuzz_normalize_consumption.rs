#![no_main]
use helmi::{Resolution, TimeNormalizer, normalize_consumption_response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let normalized =
        normalize_consumption_response(&payload, Resolution::Hour, &TimeNormalizer::default());

    // Output window stays strictly ascending
    let points = normalized.points.points();
    assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
});
