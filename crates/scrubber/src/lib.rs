//! PHI/PII scrubber.
//!
//! Detects protected health information and personally identifiable
//! information in text destined for chat rooms, redacts it, and can
//! quarantine whole messages when critical patterns fire. Two modes:
//! buffered (accumulate, scrub atomically at flush; the compliance
//! default) and streaming (scrub each chunk as it arrives; patterns
//! straddling a chunk boundary may be missed).

mod patterns;
mod scrubber;

pub use patterns::{PatternTable, PhiPattern};
pub use scrubber::{
    Detection, QuarantineNotifier, ScrubOutcome, Scrubber, QUARANTINE_NOTICE,
};
