//! Rolling channel history
//!
//! [`ChannelBuffer`] is the single-series ring; [`ChannelBufferStore`] keeps a
//! timestamp ring plus one ring per declared [`Channel`](crate::types::Channel)
//! in lock-step.

mod channel_buffer;
mod store;

pub use channel_buffer::ChannelBuffer;
pub use store::{ChannelBufferStore, HistorySnapshot};
