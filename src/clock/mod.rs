//! Period-cycle math and the injectable clock.
//!
//! [`PeriodPolicy`] decides whether an assignment is stale; [`Clock`]
//! supplies "now" so callers never read the wall clock directly.

pub mod period;
pub mod zone;

pub use period::{PeriodPolicy, PolicyKind, parse_duration, parse_time_of_day};
pub use zone::{Clock, ManualClock, SystemClock, resolve_zone, truncate_to_secs};
