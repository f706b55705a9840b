use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tallyho_core::errors::ApplicationError;
use tallyho_core::poll::PollId;
use tallyho_core::time::Clock;
use tallyho_db::{PollStore, StoreError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Ends a poll whose scheduled end time has passed.
#[async_trait]
pub trait PollEnder: Send + Sync {
    async fn end_scheduled(&self, poll_id: &PollId) -> Result<(), ApplicationError>;
}

/// In-process timers for polls with an `end` setting.
///
/// Timers do not survive a restart; [`SchedulerService::activate`] re-arms them from the store.
pub struct SchedulerService {
    ender: Arc<dyn PollEnder>,
    clock: Arc<dyn Clock>,
    tasks: Mutex<JoinSet<()>>,
}

impl SchedulerService {
    pub fn new(ender: Arc<dyn PollEnder>, clock: Arc<dyn Clock>) -> Self {
        Self { ender, clock, tasks: Mutex::new(JoinSet::new()) }
    }

    /// Schedules `poll_id` to end at `end`. Past end times fire immediately.
    pub fn arm(&self, poll_id: PollId, end: DateTime<Utc>) {
        let delay = (end - self.clock.now()).to_std().unwrap_or_default();
        let ender = Arc::clone(&self.ender);

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}

        debug!(
            event_name = "poll.schedule.armed",
            poll_id = %poll_id,
            delay_secs = delay.as_secs(),
            "poll end scheduled"
        );
        tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = ender.end_scheduled(&poll_id).await {
                warn!(
                    event_name = "poll.schedule.end_failed",
                    poll_id = %poll_id,
                    error = %error,
                    "scheduled poll end failed"
                );
            }
        });
    }

    /// Arms a timer for every stored poll with an end time. Unreadable polls are skipped.
    pub async fn activate(&self, polls: &PollStore) -> Result<usize, StoreError> {
        let mut armed = 0;
        for poll_id in polls.list_ids().await? {
            let poll = match polls.get(&poll_id).await {
                Ok(poll) => poll,
                Err(error) => {
                    warn!(
                        event_name = "poll.schedule.skipped",
                        poll_id = %poll_id,
                        error = %error,
                        "could not load poll while re-arming timers"
                    );
                    continue;
                }
            };
            if let Some(end) = poll.settings.end {
                self.arm(poll.id, end);
                armed += 1;
            }
        }
        info!(event_name = "poll.schedule.activated", armed, "poll timers re-armed");
        Ok(armed)
    }

    /// Number of timers that have not fired yet.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    pub fn shutdown(&self) {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).abort_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tallyho_core::errors::ApplicationError;
    use tallyho_core::poll::{Poll, PollId, Settings};
    use tallyho_core::time::{Clock, FixedClock};
    use tallyho_db::Store;
    use tokio::sync::Mutex;

    use super::{PollEnder, SchedulerService};

    #[derive(Default)]
    struct RecordingEnder {
        ended: Mutex<Vec<PollId>>,
    }

    #[async_trait]
    impl PollEnder for RecordingEnder {
        async fn end_scheduled(&self, poll_id: &PollId) -> Result<(), ApplicationError> {
            self.ended.lock().await.push(poll_id.clone());
            Ok(())
        }
    }

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid"))
    }

    fn after(clock: &FixedClock, secs: i64) -> DateTime<Utc> {
        clock.now() + chrono::Duration::seconds(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_the_delay() {
        let ender = Arc::new(RecordingEnder::default());
        let clock = clock();
        let scheduler = SchedulerService::new(ender.clone(), Arc::new(clock));
        let id = PollId::from("p1");

        scheduler.arm(id.clone(), after(&clock, 60));
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(ender.ended.lock().await.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*ender.ended.lock().await, vec![id]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn past_end_fires_immediately() {
        let ender = Arc::new(RecordingEnder::default());
        let clock = clock();
        let scheduler = SchedulerService::new(ender.clone(), Arc::new(clock));

        scheduler.arm(PollId::from("late"), after(&clock, -3600));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(ender.ended.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activate_rearms_only_polls_with_an_end() {
        let ender = Arc::new(RecordingEnder::default());
        let clock = clock();
        let scheduler = SchedulerService::new(ender.clone(), Arc::new(clock));
        let store = Store::in_memory();

        let timed = Settings {
            end: Some(after(&clock, 3600)),
            ..Settings::default()
        };
        let timed = Poll::new("creator", "Timed", &["A", "B"], timed, &clock).expect("valid");
        let open = Poll::new("creator", "Open", &["A", "B"], Settings::default(), &clock)
            .expect("valid");
        store.polls().insert(&timed).await.expect("insert");
        store.polls().insert(&open).await.expect("insert");

        let armed = scheduler.activate(store.polls()).await.expect("activate");
        assert_eq!(armed, 1);
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(*ender.ended.lock().await, vec![timed.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let ender = Arc::new(RecordingEnder::default());
        let clock = clock();
        let scheduler = SchedulerService::new(ender.clone(), Arc::new(clock));

        scheduler.arm(PollId::from("p"), after(&clock, 10));
        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(ender.ended.lock().await.is_empty());
    }
}
