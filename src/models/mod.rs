pub mod candidate;
pub mod event;
pub mod record;
pub mod session;
pub mod signal;

pub use candidate::{WindowCandidate, WindowSource};
pub use event::{EventOrigin, HourlyAggregate, RawMessage, TimestampedEvent, TokenUsage};
pub use record::WindowRecord;
pub use session::{
    BurnRate, MULTIPLE_PROJECTS, Projection, Session, TokenCounts, UsageStats,
    WindowDetectionInfo,
};
pub use signal::{LimitKind, LimitSignal};
