#![no_main]

//! Arbitrary JSON payloads sign and verify over their serialized bytes.

use courier_delivery::signer::{sign, verify};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(body) = serde_json::to_vec(&payload) else {
        return;
    };

    if let Ok(signature) = sign("whsec_fuzz", &body) {
        assert!(verify("whsec_fuzz", &body, &signature));
        assert!(!verify("whsec_other", &body, &signature));
    }
});
