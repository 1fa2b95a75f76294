//! Daily digest scheduler.
//!
//! A timer task computes the next local firing time from `BROADCAST_TIMES` and
//! hands a `BroadcastJob` to a single worker over a channel. The worker runs jobs
//! one at a time, so categories are delivered sequentially and never overlap.
//!
//! `stop()` cancels the timer and the worker. A job already running finishes the
//! category it is delivering, then skips the rest. A worker started afterwards
//! waits for the retiring one before taking jobs.

use std::{fmt::Display, sync::Arc, time::Duration};

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broadcast::{BatchOutcome, Broadcaster},
    domain::ChatId,
    messaging::port::MessagingPort,
    Error, Result,
};

const JOB_QUEUE_CAPACITY: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastJob {
    /// Digest of every category. `notify` receives the outcome summary.
    Digest { notify: Option<ChatId> },
    Announcement { text: String, notify: Option<ChatId> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Armed,
    Firing,
}

#[derive(Clone)]
pub struct NewsScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    times: Vec<NaiveTime>,
    broadcaster: Arc<Broadcaster>,
    messenger: Arc<dyn MessagingPort>,
    state: Mutex<SchedulerState>,
}

struct SchedulerState {
    phase: SchedulerPhase,
    cancel: Option<CancellationToken>,
    jobs: Option<mpsc::Sender<BroadcastJob>>,
    timer: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    retiring: Option<JoinHandle<()>>,
    last_outcomes: Vec<BatchOutcome>,
}

impl NewsScheduler {
    pub fn new(
        times: Vec<NaiveTime>,
        broadcaster: Arc<Broadcaster>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                times,
                broadcaster,
                messenger,
                state: Mutex::new(SchedulerState {
                    phase: SchedulerPhase::Idle,
                    cancel: None,
                    jobs: None,
                    timer: None,
                    worker: None,
                    retiring: None,
                    last_outcomes: Vec::new(),
                }),
            }),
        }
    }

    /// Arm the timer and start the worker. No-op when already running.
    pub fn start(&self) {
        let mut st = self.inner.state.lock();
        if st.cancel.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);

        let timer = tokio::spawn(timer_loop(
            self.inner.times.clone(),
            tx.clone(),
            cancel.clone(),
            Local::now,
        ));
        let scheduler = self.clone();
        let worker_cancel = cancel.clone();
        let retiring = st.retiring.take();
        let worker = tokio::spawn(async move {
            if let Some(previous) = retiring {
                if let Err(e) = previous.await {
                    warn!("previous broadcast worker ended abnormally: {e}");
                }
            }
            scheduler.worker_loop(rx, worker_cancel).await;
        });

        st.cancel = Some(cancel);
        st.jobs = Some(tx);
        st.timer = Some(timer);
        st.worker = Some(worker);
        if st.phase == SchedulerPhase::Idle {
            st.phase = SchedulerPhase::Armed;
        }
        drop(st);

        match self.next_fire() {
            Some(next) => info!(next = %next.format("%Y-%m-%d %H:%M"), "news scheduler started"),
            None => warn!("news scheduler started without broadcast times"),
        }
    }

    /// Halt future firings. A running job completes its current category.
    pub fn stop(&self) {
        let mut st = self.inner.state.lock();
        let Some(cancel) = st.cancel.take() else {
            return;
        };
        cancel.cancel();
        st.jobs.take();
        st.timer.take();
        st.retiring = st.worker.take();
        if st.phase == SchedulerPhase::Armed {
            st.phase = SchedulerPhase::Idle;
        }
        info!("news scheduler stopped");
    }

    /// Queue a job for the worker without waiting for it to run.
    pub fn submit(&self, job: BroadcastJob) -> Result<()> {
        let st = self.inner.state.lock();
        let Some(tx) = st.jobs.as_ref() else {
            return Err(Error::External("scheduler is not running".to_string()));
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => Error::External("broadcast queue is full".to_string()),
            TrySendError::Closed(_) => Error::External("scheduler is not running".to_string()),
        })
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.inner.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().cancel.is_some()
    }

    pub fn next_fire(&self) -> Option<DateTime<Local>> {
        next_fire_after(&self.inner.times, &Local::now())
    }

    pub fn last_outcomes(&self) -> Vec<BatchOutcome> {
        self.inner.state.lock().last_outcomes.clone()
    }

    pub fn status_text(&self) -> String {
        let times = self
            .inner
            .times
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let next = self
            .next_fire()
            .filter(|_| self.is_running())
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        let mut lines = vec![
            format!("Scheduler: {:?}", self.phase()),
            format!("Broadcast times: {times}"),
            format!("Next digest: {next}"),
        ];
        for outcome in self.last_outcomes() {
            lines.push(format!("Last run {}", outcome.summary_line()));
        }
        lines.join("\n")
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        self.inner.state.lock().phase = phase;
    }

    async fn worker_loop(&self, mut rx: mpsc::Receiver<BroadcastJob>, cancel: CancellationToken) {
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            self.set_phase(SchedulerPhase::Firing);
            self.run_job(job, &cancel).await;
            // A restart may have happened while this job ran.
            let mut st = self.inner.state.lock();
            st.phase = if st.cancel.is_some() {
                SchedulerPhase::Armed
            } else {
                SchedulerPhase::Idle
            };
        }
    }

    async fn run_job(&self, job: BroadcastJob, cancel: &CancellationToken) {
        let (outcomes, notify) = match job {
            BroadcastJob::Digest { notify } => {
                let mut outcomes = Vec::new();
                for category in self.inner.broadcaster.categories() {
                    if cancel.is_cancelled() {
                        info!(category = %category, "scheduler stopped, skipping remaining categories");
                        break;
                    }
                    outcomes.push(self.inner.broadcaster.broadcast_category(&category).await);
                }
                (outcomes, notify)
            }
            BroadcastJob::Announcement { text, notify } => {
                (vec![self.inner.broadcaster.broadcast_text(&text).await], notify)
            }
        };

        if let Some(chat_id) = notify {
            let mut report = vec!["✅ Broadcast finished".to_string()];
            report.extend(outcomes.iter().map(BatchOutcome::summary_line));
            if let Err(e) = self
                .inner
                .messenger
                .send_text(chat_id, &report.join("\n"))
                .await
            {
                error!(chat_id = chat_id.0, "failed to report broadcast outcome: {e}");
            }
        }

        self.inner.state.lock().last_outcomes = outcomes;
    }
}

async fn timer_loop<Tz, F>(
    times: Vec<NaiveTime>,
    jobs: mpsc::Sender<BroadcastJob>,
    cancel: CancellationToken,
    clock: F,
) where
    Tz: TimeZone,
    Tz::Offset: Display,
    F: Fn() -> DateTime<Tz>,
{
    let mut after = clock();
    loop {
        let now = clock();
        if now > after {
            after = now.clone();
        }
        let Some(next) = next_fire_after(&times, &after) else {
            warn!("no broadcast times configured, timer stopping");
            break;
        };
        let wait = (next.naive_utc() - now.naive_utc())
            .to_std()
            .unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => {
                info!(at = %next.format("%H:%M"), "scheduled digest due");
                if let Err(e) = jobs.try_send(BroadcastJob::Digest { notify: None }) {
                    warn!("scheduled digest dropped: {e}");
                }
                after = next;
            }
        }
    }
}

/// Earliest firing strictly after `after`, in `after`'s time zone.
///
/// Times that fall into a DST gap are skipped for that day; ambiguous times fire
/// on their first occurrence.
pub fn next_fire_after<Tz: TimeZone>(
    times: &[NaiveTime],
    after: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let tz = after.timezone();
    let today = after.date_naive();

    (0..=2).find_map(|offset| {
        let day = today + chrono::Duration::days(offset);
        times
            .iter()
            .filter_map(|t| tz.from_local_datetime(&day.and_time(*t)).earliest())
            .filter(|candidate| candidate > after)
            .min()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        domain::UserId,
        feeds::StaticFeedSource,
        testing::{news_item, test_config, FakeMessenger},
        users::UserStore,
    };
    use chrono::{NaiveDate, Utc};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn next_fire_picks_the_upcoming_slot() {
        let times = [hm(9, 0), hm(18, 0)];
        assert_eq!(next_fire_after(&times, &utc(6, 7, 30)), Some(utc(6, 9, 0)));
        assert_eq!(next_fire_after(&times, &utc(6, 9, 0)), Some(utc(6, 18, 0)));
        assert_eq!(next_fire_after(&times, &utc(6, 12, 0)), Some(utc(6, 18, 0)));
        assert_eq!(next_fire_after(&times, &utc(6, 23, 59)), Some(utc(7, 9, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_per_slot() {
        let base = NaiveDate::from_ymd_opt(2025, 1, 6)
            .unwrap()
            .and_hms_opt(8, 59, 57)
            .unwrap()
            .and_utc();
        let t0 = tokio::time::Instant::now();
        let clock = move || {
            base + chrono::Duration::from_std(tokio::time::Instant::now() - t0).unwrap()
        };

        let (tx, mut rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let timer = tokio::spawn(timer_loop(vec![hm(9, 0)], tx, cancel.clone(), clock));

        assert_eq!(rx.recv().await, Some(BroadcastJob::Digest { notify: None }));
        assert!(tokio::time::Instant::now() - t0 >= Duration::from_secs(3));
        assert!(
            tokio::time::timeout(Duration::from_secs(3600), rx.recv())
                .await
                .is_err(),
            "a slot fired twice"
        );

        cancel.cancel();
        timer.await.unwrap();
    }

    #[test]
    fn next_fire_handles_unsorted_and_empty_times() {
        assert_eq!(
            next_fire_after(&[hm(18, 0), hm(9, 0)], &utc(6, 8, 0)),
            Some(utc(6, 9, 0))
        );
        assert_eq!(next_fire_after(&[], &utc(6, 8, 0)), None);
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        messenger: Arc<FakeMessenger>,
        scheduler: NewsScheduler,
    }

    fn fixture(messenger: FakeMessenger) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cfg: Arc<Config> = Arc::new(test_config("99"));
        let store = Arc::new(UserStore::open(
            dir.path().join("users.json"),
            cfg.categories(),
        ));
        store.register_user(UserId(1), None);
        store.add_subscription(UserId(1), "general");
        store.add_subscription(UserId(1), "tech");

        let feeds = StaticFeedSource::new(vec![
            ("general".into(), news_item("Election night", "2025-01-07T08:00:00Z")),
            ("general".into(), news_item("Storm warning", "2025-01-06T08:00:00Z")),
            ("tech".into(), news_item("Chip launch", "2025-01-07T09:00:00Z")),
        ]);
        let messenger = Arc::new(messenger);
        let broadcaster = Arc::new(Broadcaster::new(
            cfg.clone(),
            messenger.clone(),
            Arc::new(feeds),
            store,
        ));
        let scheduler = NewsScheduler::new(
            cfg.broadcast_times.clone(),
            broadcaster,
            messenger.clone(),
        );
        Fixture {
            _dir: dir,
            messenger,
            scheduler,
        }
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn submit_requires_a_running_scheduler() {
        let f = fixture(FakeMessenger::default());
        assert_eq!(f.scheduler.phase(), SchedulerPhase::Idle);
        assert!(f
            .scheduler
            .submit(BroadcastJob::Digest { notify: None })
            .is_err());
    }

    #[tokio::test]
    async fn manual_digest_runs_every_category_and_reports() {
        let f = fixture(FakeMessenger::default());
        f.scheduler.start();
        assert_eq!(f.scheduler.phase(), SchedulerPhase::Armed);

        f.scheduler
            .submit(BroadcastJob::Digest {
                notify: Some(ChatId(99)),
            })
            .unwrap();
        wait_until("admin report", || !f.messenger.sent_to(ChatId(99)).is_empty()).await;

        let msgs = f.messenger.sent_to(ChatId(1));
        assert_eq!(msgs.len(), 5);
        assert!(msgs[0].contains("Daily General News Update"));
        assert!(msgs[3].contains("Daily Tech News Update"));

        let report = &f.messenger.sent_to(ChatId(99))[0];
        assert!(report.contains("general: delivered to 1/1 users (0 failed)"));
        assert!(report.contains("tech: delivered to 1/1 users (0 failed)"));

        wait_until("armed", || f.scheduler.phase() == SchedulerPhase::Armed).await;
        assert_eq!(f.scheduler.last_outcomes().len(), 3);
        f.scheduler.stop();
        assert_eq!(f.scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test]
    async fn stop_finishes_current_category_then_skips_the_rest() {
        let f = fixture(FakeMessenger::with_latency(Duration::from_millis(30)));
        f.scheduler.start();
        f.scheduler
            .submit(BroadcastJob::Digest { notify: None })
            .unwrap();

        wait_until("firing", || f.scheduler.phase() == SchedulerPhase::Firing).await;
        f.scheduler.stop();
        wait_until("idle", || f.scheduler.phase() == SchedulerPhase::Idle).await;

        let msgs = f.messenger.sent_to(ChatId(1));
        assert_eq!(msgs.len(), 3);
        assert!(msgs.iter().all(|m| !m.contains("Chip launch")));
        assert!(!f.scheduler.is_running());
    }

    #[tokio::test]
    async fn restart_waits_for_the_retiring_worker() {
        let f = fixture(FakeMessenger::with_latency(Duration::from_millis(30)));
        f.scheduler.start();
        f.scheduler
            .submit(BroadcastJob::Digest { notify: None })
            .unwrap();
        wait_until("firing", || f.scheduler.phase() == SchedulerPhase::Firing).await;

        f.scheduler.stop();
        f.scheduler.start();
        f.scheduler
            .submit(BroadcastJob::Announcement {
                text: "hello all".into(),
                notify: None,
            })
            .unwrap();
        wait_until("announcement", || f.messenger.sent_to(ChatId(1)).len() == 4).await;

        let msgs = f.messenger.sent_to(ChatId(1));
        assert!(msgs[..3].iter().all(|m| !m.contains("hello all")));
        assert!(msgs[0].contains("Daily General News Update"));
        assert!(msgs[3].contains("hello all"));
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn announcement_job_reports_to_admin() {
        let f = fixture(FakeMessenger::default());
        f.scheduler.start();
        f.scheduler
            .submit(BroadcastJob::Announcement {
                text: "hello all".into(),
                notify: Some(ChatId(99)),
            })
            .unwrap();
        wait_until("admin report", || !f.messenger.sent_to(ChatId(99)).is_empty()).await;

        assert!(f.messenger.sent_to(ChatId(1))[0].contains("hello all"));
        assert!(f.messenger.sent_to(ChatId(99))[0].contains("announcement: delivered to 1/1"));
        f.scheduler.stop();
    }
}
