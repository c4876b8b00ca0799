//! Sweep scheduling
//!
//! Cooperative, request-driven garbage collection: there is no background
//! timer thread. Each inbound operation asks the scheduler whether a sweep
//! is due, and the scheduler advances the persisted `last_sweep_at` BEFORE
//! the sweep runs, so concurrent callers cannot all trigger one. No traffic
//! means no sweeps, which is fine: dead records are also caught lazily at
//! redeem time.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::meta::{MetaResult, SettingsStore, LAST_SWEEP_AT};

/// Decides when a sweep runs
pub struct GcScheduler {
    settings: Arc<SettingsStore>,
    interval_seconds: i64,
}

impl GcScheduler {
    /// Create a scheduler over the persisted settings
    pub fn new(settings: Arc<SettingsStore>, interval_seconds: i64) -> Self {
        Self {
            settings,
            interval_seconds,
        }
    }

    /// Seed `last_sweep_at` on a fresh store so the first request does not
    /// sweep an empty store.
    pub fn initialize(&self, now: DateTime<Utc>) -> MetaResult<()> {
        self.settings
            .swap_i64_if(LAST_SWEEP_AT, now.timestamp(), |cur| cur.is_none())?;
        Ok(())
    }

    /// Claim the right to sweep if the interval has elapsed.
    ///
    /// `last_sweep_at` is advanced inside the same critical section as the
    /// check, so exactly one of any number of concurrent callers wins.
    pub fn try_begin(&self, now: DateTime<Utc>) -> MetaResult<bool> {
        let now_secs = now.timestamp();
        let interval = self.interval_seconds;
        self.settings
            .swap_i64_if(LAST_SWEEP_AT, now_secs, move |cur| match cur {
                Some(last) => now_secs - last > interval,
                None => true,
            })
    }

    /// The persisted last sweep time (unix seconds)
    pub fn last_sweep_at(&self) -> MetaResult<Option<i64>> {
        self.settings.get_i64(LAST_SWEEP_AT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn scheduler(temp: &TempDir, interval: i64) -> GcScheduler {
        let settings =
            Arc::new(SettingsStore::open(&temp.path().join("settings.json")).unwrap());
        GcScheduler::new(settings, interval)
    }

    #[test]
    fn test_initialize_seeds_once() {
        let temp = TempDir::new().unwrap();
        let gc = scheduler(&temp, 3600);
        let now = Utc::now();

        gc.initialize(now).unwrap();
        assert_eq!(gc.last_sweep_at().unwrap(), Some(now.timestamp()));

        // A later initialize does not move the stamp
        gc.initialize(now + Duration::seconds(500)).unwrap();
        assert_eq!(gc.last_sweep_at().unwrap(), Some(now.timestamp()));
    }

    #[test]
    fn test_not_due_within_interval() {
        let temp = TempDir::new().unwrap();
        let gc = scheduler(&temp, 3600);
        let now = Utc::now();

        gc.initialize(now).unwrap();
        assert!(!gc.try_begin(now).unwrap());
        assert!(!gc.try_begin(now + Duration::seconds(3600)).unwrap());
    }

    #[test]
    fn test_due_after_interval_and_claimed_once() {
        let temp = TempDir::new().unwrap();
        let gc = scheduler(&temp, 3600);
        let now = Utc::now();

        gc.initialize(now).unwrap();

        let later = now + Duration::seconds(3601);
        assert!(gc.try_begin(later).unwrap());
        // The stamp moved, so a second caller at the same instant loses
        assert!(!gc.try_begin(later).unwrap());
        assert_eq!(gc.last_sweep_at().unwrap(), Some(later.timestamp()));
    }

    #[test]
    fn test_stamp_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let now = Utc::now();

        {
            let gc = scheduler(&temp, 3600);
            gc.initialize(now).unwrap();
            gc.try_begin(now + Duration::seconds(4000)).unwrap();
        }

        let gc = scheduler(&temp, 3600);
        assert_eq!(
            gc.last_sweep_at().unwrap(),
            Some((now + Duration::seconds(4000)).timestamp())
        );
    }
}
