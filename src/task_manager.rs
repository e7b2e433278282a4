use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A named periodic task: `{interval, initial_delay, func}`, matching the
/// original's registration shape. `func` is invoked on every tick; errors
/// are logged and swallowed so one bad tick never kills the worker.
pub struct TaskSpec {
    pub name: String,
    pub interval: Duration,
    pub initial_delay: Duration,
    pub func: TaskFn,
}

impl TaskSpec {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, initial_delay: Duration, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            initial_delay,
            func: Arc::new(move || Box::pin(func())),
        }
    }
}

/// Generalizes the teacher's single staggered-cadence loop into N
/// independently supervised workers, each cancellable on its own
/// `tokio::sync::watch` channel rather than one process-wide signal.
pub struct TaskManager {
    specs: Vec<TaskSpec>,
    handles: Vec<(String, JoinHandle<()>)>,
    cancel_tx: Option<watch::Sender<bool>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { specs: Vec::new(), handles: Vec::new(), cancel_tx: None }
    }

    pub fn register(&mut self, spec: TaskSpec) {
        self.specs.push(spec);
    }

    pub fn start_all(&mut self) {
        let (tx, rx) = watch::channel(false);
        self.cancel_tx = Some(tx);

        for spec in self.specs.drain(..) {
            let mut rx = rx.clone();
            let name = spec.name.clone();
            let interval = spec.interval;
            let initial_delay = spec.initial_delay;
            let func = spec.func.clone();

            let handle = tokio::spawn(async move {
                if !initial_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(initial_delay) => {}
                        _ = rx.changed() => return,
                    }
                }

                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = (func)().await {
                                warn!(task = %name, "tick failed: {e}");
                            }
                        }
                        _ = rx.changed() => {
                            info!(task = %name, "shutting down");
                            break;
                        }
                    }
                }
            });

            self.handles.push((name, handle));
        }
    }

    /// Signals cancellation, then awaits every worker up to the 30s
    /// deadline; any still running past it are aborted.
    pub async fn stop_all(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(true);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DEADLINE;
        for (name, handle) in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = %name, "panicked: {e}"),
                Err(_) => {
                    warn!(task = %name, "did not stop within the shutdown deadline, aborting");
                }
            }
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn ticks_and_stops_cleanly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut mgr = TaskManager::new();
        let c = counter.clone();
        mgr.register(TaskSpec::new(
            "counter",
            Duration::from_millis(10),
            Duration::ZERO,
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));
        mgr.start_all();
        tokio::time::sleep(Duration::from_millis(45)).await;
        mgr.stop_all().await;
        assert!(counter.load(Ordering::SeqCst) >= 2);
    }
}
