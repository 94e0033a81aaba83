//! Domain Layer - Core logic for the double signal bot
//!
//! Pure state machines and value types with no network dependencies. All
//! external interactions happen through the ports layer; room sessions
//! communicate outward only through dispatch requests.

pub mod messages;
pub mod outcome;
pub mod rate_limiter;
pub mod room;
pub mod signal;

pub use messages::{DispatchRequest, TextKind};
pub use outcome::{Color, Outcome};
pub use rate_limiter::{DispatchLimiter, TokenBucket};
pub use room::{RoomConfig, RoomSession, RoomStats, HISTORY_LIMIT};
pub use signal::{Resolution, Signal, SignalStatus};
