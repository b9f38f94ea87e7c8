use crate::protocol::TransportLimits;
use crate::storage::{ContentRecordStore, MetadataStore, ObjectStore, ReferenceStore};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Default time a removal candidate stays revivable before it may be reclaimed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Everything a call handler needs. Cheap to clone; every handler gets its own
/// copy.
#[derive(Clone)]
pub struct ServiceContext {
    pub content_records: ContentRecordStore,
    pub references: ReferenceStore,
    pub objects: Arc<dyn ObjectStore>,
    pub limits: TransportLimits,
    /// Must exceed the duration of the slowest Put.
    pub grace_period: Duration,
}

impl ServiceContext {
    pub fn new(metadata: &MetadataStore, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            content_records: metadata.content_records(),
            references: metadata.references(),
            objects,
            limits: TransportLimits::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_limits(mut self, limits: TransportLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Candidates marked at or before the returned instant are reclaimable.
    pub fn reclaim_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.grace_period)
            .ok()
            .and_then(|grace| now.checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
