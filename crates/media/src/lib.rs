//! Shared media vocabulary for the recorder.
//!
//! Capture sources, container writers and container readers are platform
//! specific. This crate defines the contracts they implement along with the
//! pure helpers (geometry, levels, timecode, track labels) that both the live
//! recorder and the post-processing passes depend on.

mod capture;
mod completion;
mod container;
pub mod geometry;
pub mod level;
mod sample;
pub mod timecode;
pub mod tracks;

#[cfg(any(test, feature = "test-utils"))]
pub mod sim;

pub use capture::*;
pub use completion::*;
pub use container::*;
pub use reel_timestamp::MediaTime;
pub use sample::*;
