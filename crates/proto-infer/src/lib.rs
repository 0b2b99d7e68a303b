// Protocol inference crate
// Classifies raw socket payloads into application protocols without parsing them

mod carry;
pub mod detect;
mod engine;
mod types;

pub use carry::HeaderCarry;
pub use detect::CarriedMatch;
pub use engine::{DETECTION_ORDER, InferenceEngine};
pub use types::{InferredMessage, MessageType, Protocol, ProtocolSet};
