//! Statistics derivation: periods, canonical statuses, timeline replay,
//! weight markers and the incremental sync engine that combines them.

pub mod engine;
pub mod period;
pub mod status;
pub mod timeline;
pub mod weight;

pub use engine::{CommitterStats, PeriodUserStats, SyncEngine};
pub use period::{Period, PeriodRange};
pub use status::{derive_status, Status};
pub use timeline::{replay, ItemTimeline, StatusInterval};
pub use weight::extract_weight;
