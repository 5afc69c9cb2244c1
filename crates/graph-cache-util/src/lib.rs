//! graph-cache-util - leaf helpers shared by the graph-cache crates.
//!
//! Nothing in here knows about records, layers, or selections.

pub mod clock;
pub mod fuzzer;
pub mod stable;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fuzzer::Fuzzer;
pub use stable::{stringify, stringify_unquoted_keys};
