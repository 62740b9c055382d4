//! Audio input and output.
//!
//! Sources produce mono float samples for the capture pipeline; the playback
//! scheduler places decoded response audio on an output device's clock.

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod output;
pub mod pcm;
pub mod playback;
pub mod recorder;
pub mod wav;
