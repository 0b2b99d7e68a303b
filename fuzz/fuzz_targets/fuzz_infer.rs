//! Fuzz target: Raw byte inference
//!
//! Feeds random bytes to every detector and the engine. Detectors must never
//! panic or read past the payload, whatever the length fields claim.

#![no_main]

use libfuzzer_sys::fuzz_target;
use proto_infer::{HeaderCarry, InferenceEngine, Protocol, detect};

fuzz_target!(|data: &[u8]| {
    let carry = HeaderCarry::new();
    let _ = detect::infer_http(data);
    let _ = detect::infer_cql(data);
    let _ = detect::infer_mongo(data);
    let _ = detect::infer_pgsql(data);
    let _ = detect::infer_mysql(data, &carry);
    let _ = detect::infer_kafka(data, &carry);
    let _ = detect::infer_amqp(data);
    let _ = detect::infer_dns(data);
    let _ = detect::is_redis_message(data);
    let _ = detect::infer_mux(data);
    let _ = detect::infer_nats(data);

    let engine = InferenceEngine::default();
    let mut carry = HeaderCarry::new();
    let inferred = engine.infer(data, &mut carry, Protocol::Unknown);
    assert_ne!(inferred.protocol, Protocol::Http2);
    assert_eq!(carry.prev_count(), data.len());
});
