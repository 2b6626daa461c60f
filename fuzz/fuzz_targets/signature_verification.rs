#![no_main]

//! Signature verification must never panic and must only accept the exact
//! signature for a payload.

use courier_delivery::signer::{sign, verify, SIGNATURE_PREFIX};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |&b| usize::from(b)).min(data.len());
    let (head, payload) = data.split_at(split);
    let secret = String::from_utf8_lossy(head);
    let candidate = String::from_utf8_lossy(payload);

    // Arbitrary header values: garbage, truncated hex, wrong prefix.
    let _ = verify(&secret, payload, &candidate);
    let _ = verify(&secret, payload, &format!("{SIGNATURE_PREFIX}{candidate}"));

    if let Ok(signature) = sign(&secret, payload) {
        assert!(verify(&secret, payload, &signature));

        let mut tampered = payload.to_vec();
        tampered.push(b'!');
        assert!(!verify(&secret, &tampered, &signature));

        let truncated = &signature[..signature.len() - 1];
        assert!(!verify(&secret, payload, truncated));
    }
});
