use crate::error::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type PollCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct PollerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A task that runs an async callback periodically.
///
/// A callback error is logged and polling continues, except for
/// `NotImplemented` errors, which stop the poller since retrying cannot help.
pub struct Poller {
    name: String,
    callback: PollCallback,
    original_delay: Duration,
    delay: Arc<Mutex<Duration>>,
    task: tokio::sync::Mutex<Option<PollerTask>>,
}

impl Poller {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F, delay: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback: PollCallback = Arc::new(move || -> BoxFuture<'static, Result<()>> {
            Box::pin(callback())
        });
        Self {
            name: name.into(),
            callback,
            original_delay: delay,
            delay: Arc::new(Mutex::new(delay)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current delay between calls.
    pub fn delay(&self) -> Duration {
        *self.delay.lock()
    }

    /// Whether the polling task is alive.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start polling. `None` restores the delay given at construction.
    /// Starting a running poller only updates the delay.
    pub async fn start(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay.unwrap_or(self.original_delay);

        let mut task = self.task.lock().await;
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                return;
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_poller(
            self.name.clone(),
            Arc::clone(&self.callback),
            Arc::clone(&self.delay),
            token.clone(),
        ));
        *task = Some(PollerTask { token, handle });
        debug!("Poller '{}' started with delay {:?}", self.name, self.delay());
    }

    /// Cancel the poller and wait for the task to finish, including a
    /// callback that is already running.
    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.token.cancel();
            let _ = task.handle.await;
            debug!("Poller '{}' stopped", self.name);
        }
    }

    /// Change the delay between calls.
    ///
    /// Changes smaller than a microsecond are ignored. With `immediate` the
    /// running sleep is abandoned and the poller restarts with the new delay;
    /// otherwise the new delay applies after the current sleep.
    pub async fn set_delay(&self, delay: Option<Duration>, immediate: bool) {
        let new_delay = delay.unwrap_or(self.original_delay);
        let current = self.delay();
        let difference = if new_delay > current {
            new_delay - current
        } else {
            current - new_delay
        };
        if difference < Duration::from_micros(1) {
            return;
        }

        if !self.is_running().await {
            return;
        }

        if immediate {
            self.stop().await;
            self.start(Some(new_delay)).await;
        } else {
            *self.delay.lock() = new_delay;
        }
    }

    /// Run the callback once right now, pausing the loop while it runs.
    pub async fn call_now(&self) -> Result<()> {
        let was_running = self.is_running().await;
        let delay = self.delay();
        if was_running {
            self.stop().await;
        }

        let result = (self.callback)().await;

        if was_running {
            self.start(Some(delay)).await;
        }
        result
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.token.cancel();
        }
    }
}

async fn run_poller(
    name: String,
    callback: PollCallback,
    delay: Arc<Mutex<Duration>>,
    token: CancellationToken,
) {
    // A call in flight always completes; cancellation is seen between calls.
    while !token.is_cancelled() {
        let result = callback().await;

        if let Err(e) = result {
            if e.is_not_implemented() {
                error!("Poller '{}' callback is not implemented, stopping: {}", name, e);
                break;
            }
            warn!("Poller '{}' callback failed: {}", name, e);
        }

        let sleep_for = *delay.lock();
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}
