//! Head tracking.
//!
//! - [`HeadState`]: the current head of one driver plus its update broadcast
//! - [`Beat`] / [`BeatBloom`] / [`BloomPredicate`]: push-channel announcements and the injected
//!   touched-address test
//! - [`HeadTracker`]: the single loop that advances the head by polling and by beats

pub mod beat;
pub mod state;
pub mod tracker;

pub use beat::{AssumeTouched, Beat, BeatBloom, BloomPredicate};
pub use state::{HeadState, HeadWaiter};
pub use tracker::{HeadTracker, TrackError, TrackerConfig};
