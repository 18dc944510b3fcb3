#![no_main]

use libfuzzer_sys::fuzz_target;
use stacksampler::encoder::{StackEncoder, FRAME_DELIMITER};
use stacksampler::frame::Sample;

fuzz_target!(|sample: Sample| {
    // Encoding either fails cleanly or yields one segment per frame
    if let Ok(key) = StackEncoder::encode(&sample) {
        assert_eq!(key.depth(), sample.len());
        assert!(!key.as_str().contains('\n'));
        if sample.is_empty() {
            assert!(key.is_empty());
        } else {
            assert_eq!(key.as_str().matches(FRAME_DELIMITER).count(), sample.len() - 1);
        }
    }
});
