//! Stream identifiers, selectors and readings.
//!
//! - [`DataStream`] - a typed, indexed channel (`counter 1024`)
//! - [`DataStreamSelector`] - an exact stream or a wildcard class (`all outputs`)
//! - [`Reading`] - one timestamped value pushed into a stream

pub mod data_stream;
pub mod reading;
pub mod selector;

pub use data_stream::{DataStream, StreamType, INTERNAL_ID_START, WILDCARD_ID};
pub use reading::Reading;
pub use selector::{DataStreamSelector, SelectorSpec, SelectorTarget};
