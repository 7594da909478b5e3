use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use agentmesh_agent::{AgentRegistry, AgentRuntime};
use agentmesh_core::TriggerInfo;
use agentmesh_events::{EventBus, Subscription};

use crate::cron::{CronJob, ScheduleSpec};

/// Connects triggers to agent executions: one global bus subscription fans
/// events out to matching agents, and a coarse periodic tick drives cron
/// jobs. Agent firing is fire-and-forget relative to event dispatch — a slow
/// agent never delays delivery to other listeners.
pub struct TriggerManager {
    bus: Arc<EventBus>,
    registry: Arc<AgentRegistry>,
    runtime: Arc<AgentRuntime>,
    tick: Duration,
    jobs: Mutex<Vec<CronJob>>,
    subscription: Mutex<Option<Subscription>>,
}

impl TriggerManager {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<AgentRegistry>,
        runtime: Arc<AgentRuntime>,
        tick: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            registry,
            runtime,
            tick,
            jobs: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        })
    }

    /// Subscribe to the bus and seed the cron job table. Calling `start`
    /// again while started is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.subscription.lock().expect("subscription lock poisoned");
        if slot.is_some() {
            return;
        }

        let registry = self.registry.clone();
        let runtime = self.runtime.clone();
        let handle = tokio::runtime::Handle::current();
        *slot = Some(self.bus.subscribe("*", move |event| {
            for agent_id in registry.agents_for_event(&event.name) {
                let runtime = runtime.clone();
                let trigger = TriggerInfo::event(&event.name, event.payload.clone());
                handle.spawn(async move {
                    let event_name = trigger.event_name.clone().unwrap_or_default();
                    if let Err(e) = runtime.execute(&agent_id, None, Some(trigger)).await {
                        warn!(agent = %agent_id, event = %event_name, error = %e, "event-triggered execution rejected");
                    }
                });
            }
        }));
        drop(slot);

        self.reconcile_jobs(Utc::now().timestamp_millis());
        info!("trigger manager started");
    }

    /// Detach from the bus. Cron state is kept for a later restart.
    pub fn stop(&self) {
        if let Some(sub) = self
            .subscription
            .lock()
            .expect("subscription lock poisoned")
            .take()
        {
            sub.unsubscribe();
            info!("trigger manager stopped");
        }
    }

    /// Bring the job table in line with the registry's current cron
    /// triggers: new triggers get a job with a future `next_run`, jobs whose
    /// trigger disappeared are dropped, existing jobs keep their state.
    fn reconcile_jobs(&self, now_ms: i64) {
        let entries = self.registry.cron_entries();
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");

        jobs.retain(|job| {
            entries
                .iter()
                .any(|e| e.agent_id == job.agent_id && e.schedule == job.schedule)
        });

        for entry in entries {
            let known = jobs
                .iter()
                .any(|j| j.agent_id == entry.agent_id && j.schedule == entry.schedule);
            if known {
                continue;
            }
            match ScheduleSpec::parse(&entry.schedule) {
                Ok(spec) => {
                    if let Some(next) = spec.next_run_after(now_ms, entry.timezone.as_deref()) {
                        debug!(agent = %entry.agent_id, schedule = %entry.schedule, next_run_ms = next, "cron job scheduled");
                        jobs.push(CronJob {
                            agent_id: entry.agent_id,
                            schedule: entry.schedule,
                            timezone: entry.timezone,
                            next_run_ms: next,
                            last_run_ms: None,
                            enabled: true,
                        });
                    }
                }
                Err(e) => {
                    warn!(agent = %entry.agent_id, schedule = %entry.schedule, error = %e, "unparseable cron schedule ignored");
                }
            }
        }
    }

    /// Evaluate one tick: returns the (agent, schedule) pairs that came due.
    /// `next_run` is advanced strictly past `now_ms` before anything is
    /// fired, so the same due tick can never fire twice.
    pub fn run_tick(&self, now_ms: i64) -> Vec<(String, String)> {
        self.reconcile_jobs(now_ms);

        let mut due = Vec::new();
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        for job in jobs.iter_mut() {
            if !job.enabled || job.next_run_ms > now_ms {
                continue;
            }
            job.last_run_ms = Some(now_ms);
            match ScheduleSpec::parse(&job.schedule)
                .ok()
                .and_then(|spec| spec.next_run_after(now_ms, job.timezone.as_deref()))
            {
                Some(next) => job.next_run_ms = next,
                None => job.enabled = false,
            }
            due.push((job.agent_id.clone(), job.schedule.clone()));
        }
        due
    }

    fn fire_cron(&self, agent_id: String, schedule: String) {
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            let trigger = TriggerInfo::cron(&schedule);
            if let Err(e) = runtime.execute(&agent_id, None, Some(trigger)).await {
                warn!(agent = %agent_id, schedule = %schedule, error = %e, "cron-triggered execution rejected");
            }
        });
    }

    /// Periodic cron loop; runs until the shutdown signal arrives.
    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(tick_secs = self.tick.as_secs(), "cron loop started");
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_ms = Utc::now().timestamp_millis();
                    for (agent_id, schedule) in self.run_tick(now_ms) {
                        self.fire_cron(agent_id, schedule);
                    }
                }
                _ = shutdown.recv() => {
                    info!("cron loop shutting down");
                    break;
                }
            }
        }
    }

    pub fn jobs(&self) -> Vec<CronJob> {
        self.jobs.lock().expect("jobs lock poisoned").clone()
    }
}
