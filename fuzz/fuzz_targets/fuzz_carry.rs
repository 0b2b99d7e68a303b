//! Fuzz target: Split-header carry
//!
//! Replays random bytes as a sequence of reads cut at fuzzer-chosen points,
//! so 4-byte header candidates are followed by bodies of every length.

#![no_main]

use libfuzzer_sys::fuzz_target;
use proto_infer::{HeaderCarry, InferenceEngine, Protocol};

fuzz_target!(|input: (Vec<u8>, Vec<u8>)| {
    let (data, cuts) = input;
    let engine = InferenceEngine::default();
    let mut carry = HeaderCarry::new();
    let mut latched = Protocol::Unknown;

    let mut rest = data.as_slice();
    for cut in cuts {
        if rest.is_empty() {
            break;
        }
        // Bias towards the 4-byte reads the carry is about
        let len = if cut % 2 == 0 { 4 } else { usize::from(cut) };
        let (read, tail) = rest.split_at(len.min(rest.len()));
        rest = tail;

        let inferred = engine.infer(read, &mut carry, latched);
        if carry.prepend_length_header() {
            assert_eq!(inferred.protocol, Protocol::Kafka);
            assert_eq!(latched, Protocol::Unknown);
        }
        if latched == Protocol::Unknown {
            latched = inferred.protocol;
        }
    }
});
