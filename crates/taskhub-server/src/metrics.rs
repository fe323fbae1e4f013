use prometheus::{Counter, CounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the orchestrator.
pub struct Metrics {
    pub registry: Registry,

    /// Transitions applied, by resulting status and task type.
    pub tasks_total: CounterVec,

    /// Currently connected notification sessions.
    pub sessions_connected: IntGauge,

    /// Events pushed into session buffers.
    pub notifications_sent: Counter,

    /// Events dropped because a session buffer was saturated.
    pub notifications_dropped: Counter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tasks_total = CounterVec::new(
            Opts::new("th_tasks_total", "Task transitions by status and type"),
            &["status", "task_type"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let sessions_connected = IntGauge::new(
            "th_sessions_connected",
            "Number of connected notification sessions",
        )?;
        registry.register(Box::new(sessions_connected.clone()))?;

        let notifications_sent = Counter::new(
            "th_notifications_sent_total",
            "Events delivered to session buffers",
        )?;
        registry.register(Box::new(notifications_sent.clone()))?;

        let notifications_dropped = Counter::new(
            "th_notifications_dropped_total",
            "Events dropped due to saturated session buffers",
        )?;
        registry.register(Box::new(notifications_dropped.clone()))?;

        Ok(Metrics {
            registry,
            tasks_total,
            sessions_connected,
            notifications_sent,
            notifications_dropped,
        })
    }

    pub fn inc_tasks_total(&self, status: &str, task_type: &str) {
        self.tasks_total
            .with_label_values(&[status, task_type])
            .inc();
    }
}
