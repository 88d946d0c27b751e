//! Rate limiting logic and state management.

mod clock;
mod entry;
mod gatekeeper;
mod identity;
mod key;
mod limiter;
mod policy;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::LimitEntry;
pub use gatekeeper::Gatekeeper;
pub use identity::{client_identifier, AuthenticatedUser, UNKNOWN_IDENTIFIER};
pub use key::LimitKey;
pub use limiter::{Decision, FailureMode, RateLimiter, Status};
pub use policy::{Policy, PolicyConfig, PolicyRegistry, DEFAULT_MESSAGE};
pub use store::{EntryStore, MemoryStore, RedisStore, StoreError};

pub(crate) use limiter::epoch_ms_to_utc;
