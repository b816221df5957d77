//! Event fan-out from cameras and camera systems to interested listeners.

use crate::error::{BasecamError, Result};
use crate::events::{Event, EventFilter, EventPayload, Notification};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

/// Capacity of the channel used to report processed events to `wait_for`.
const SEEN_CAPACITY: usize = 256;

struct ListenerSlot {
    id: Uuid,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<Notification>,
}

/// A registry of listeners to be notified of events.
///
/// Cloning is cheap; clones share the same set of listeners.
#[derive(Clone, Default)]
pub struct EventNotifier {
    listeners: Arc<RwLock<Vec<ListenerSlot>>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Registering the same listener twice is a no-op.
    pub fn register_listener(&self, listener: &EventListener) {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|slot| slot.id == listener.id) {
            return;
        }
        listeners.push(ListenerSlot {
            id: listener.id,
            filter: listener.filter.clone(),
            sender: listener.sender.clone(),
        });
        debug!("Registered event listener {}", listener.id);
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, listener: &EventListener) -> Result<()> {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|slot| slot.id != listener.id);
        if listeners.len() == before {
            return Err(BasecamError::notifier("listener is not registered"));
        }
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Send an event to every listener whose filter accepts it. Returns the
    /// number of listeners the event was queued for.
    pub fn notify<E: Into<Event>>(&self, event: E, payload: EventPayload) -> usize {
        let notification = Notification::new(event.into(), payload);
        trace!("Notifying {}", notification.description());

        let listeners = self.listeners.read();
        let mut delivered = 0;
        for slot in listeners.iter() {
            if !slot.filter.matches(&notification.event) {
                continue;
            }
            if slot.sender.send(notification.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Identifier returned when registering a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Clone)]
enum Callback {
    Sync(Arc<dyn Fn(&Notification) + Send + Sync>),
    Async(Arc<dyn Fn(Notification) -> BoxFuture<'static, ()> + Send + Sync>),
}

struct ListenerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// An event queue with callbacks.
///
/// Events are queued as soon as the listener is registered with a notifier,
/// but callbacks only run (and `wait_for` only sees events) while the
/// listener is started.
pub struct EventListener {
    id: Uuid,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<Notification>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Notification>>>,
    callbacks: Arc<RwLock<Vec<(CallbackId, Callback)>>>,
    next_callback: AtomicU64,
    seen: broadcast::Sender<Event>,
    task: Mutex<Option<ListenerTask>>,
}

impl EventListener {
    /// Create a stopped listener. Call `start_listening` to process events.
    pub fn new(filter: EventFilter) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (seen, _) = broadcast::channel(SEEN_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            filter,
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            next_callback: AtomicU64::new(0),
            seen,
            task: Mutex::new(None),
        }
    }

    /// Create a listener and start processing immediately.
    pub async fn started(filter: EventFilter) -> Self {
        let listener = Self::new(filter);
        listener.start_listening().await;
        listener
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_listening(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Register a plain function called for every processed event.
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.push_callback(Callback::Sync(Arc::new(callback)))
    }

    /// Register an async callback. Each invocation is spawned as a task.
    pub fn register_async_callback<F, Fut>(&self, callback: F) -> CallbackId
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed = move |notification: Notification| -> BoxFuture<'static, ()> {
            Box::pin(callback(notification))
        };
        self.push_callback(Callback::Async(Arc::new(boxed)))
    }

    fn push_callback(&self, callback: Callback) -> CallbackId {
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, callback));
        id
    }

    /// De-register a callback.
    pub fn remove_callback(&self, id: CallbackId) -> Result<()> {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(callback_id, _)| *callback_id != id);
        if callbacks.len() == before {
            return Err(BasecamError::notifier("callback not registered"));
        }
        Ok(())
    }

    /// Start the processing task. Events queued while stopped are discarded.
    pub async fn start_listening(&self) {
        self.stop_listening().await;

        {
            let mut receiver = self.receiver.lock().await;
            while receiver.try_recv().is_ok() {}
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(process_queue(
            Arc::clone(&self.receiver),
            Arc::clone(&self.callbacks),
            self.seen.clone(),
            token.clone(),
        ));

        *self.task.lock() = Some(ListenerTask { token, handle });
        debug!("Event listener {} started", self.id);
    }

    /// Stop the processing task.
    pub async fn stop_listening(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            let _ = task.handle.await;
            debug!("Event listener {} stopped", self.id);
        }
    }

    /// Block until one of `events` is processed or `timeout` expires.
    ///
    /// Returns the awaited events seen at that point (normally just one), or
    /// `None` on timeout.
    pub async fn wait_for<I, E>(&self, events: I, timeout: Option<Duration>) -> Option<HashSet<Event>>
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        let wanted: HashSet<Event> = events.into_iter().map(Into::into).collect();
        let mut seen = self.seen.subscribe();

        let waiter = async {
            loop {
                match seen.recv().await {
                    Ok(event) if wanted.contains(&event) => {
                        let mut matched = HashSet::from([event]);
                        while let Ok(event) = seen.try_recv() {
                            if wanted.contains(&event) {
                                matched.insert(event);
                            }
                        }
                        return Some(matched);
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        match timeout {
            Some(duration) => tokio::time::timeout(duration, waiter).await.ok().flatten(),
            None => waiter.await,
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.token.cancel();
        }
    }
}

async fn process_queue(
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Notification>>>,
    callbacks: Arc<RwLock<Vec<(CallbackId, Callback)>>>,
    seen: broadcast::Sender<Event>,
    token: CancellationToken,
) {
    let mut receiver = receiver.lock().await;
    loop {
        let notification = tokio::select! {
            _ = token.cancelled() => break,
            next = receiver.recv() => match next {
                Some(notification) => notification,
                None => break,
            },
        };

        let snapshot: Vec<Callback> = callbacks
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in snapshot {
            match callback {
                Callback::Sync(func) => func(&notification),
                Callback::Async(func) => {
                    tokio::spawn(func(notification.clone()));
                }
            }
        }

        let _ = seen.send(notification.event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CameraEvent, CameraSystemEvent};
    use std::sync::atomic::AtomicUsize;

    fn payload() -> EventPayload {
        EventPayload::for_camera("sim1", Some("DEV_0001"))
    }

    #[tokio::test]
    async fn test_callbacks_receive_events() {
        let notifier = EventNotifier::new();
        let listener = EventListener::started(EventFilter::All).await;
        notifier.register_listener(&listener);

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        listener.register_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(CameraSystemEvent::CameraAdded, payload());
        notifier.notify(CameraEvent::CameraConnected, payload());

        let seen = listener
            .wait_for([CameraEvent::CameraConnected], Some(Duration::from_secs(1)))
            .await;
        assert!(seen.is_some());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_callback() {
        let notifier = EventNotifier::new();
        let listener = EventListener::started(EventFilter::All).await;
        notifier.register_listener(&listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.register_async_callback(move |notification| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(notification.event);
            }
        });

        notifier.notify(CameraEvent::ExposureRead, payload());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::Camera(CameraEvent::ExposureRead));
    }

    #[tokio::test]
    async fn test_filter_does_not_block_other_listeners() {
        let notifier = EventNotifier::new();
        let filtered = EventListener::new(EventFilter::only([CameraEvent::ExposureFailed]));
        let open = EventListener::new(EventFilter::All);
        notifier.register_listener(&filtered);
        notifier.register_listener(&open);

        let delivered = notifier.notify(CameraEvent::CameraConnected, payload());
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_remove_errors() {
        let notifier = EventNotifier::new();
        let listener = EventListener::new(EventFilter::All);

        notifier.register_listener(&listener);
        notifier.register_listener(&listener);
        assert_eq!(notifier.listener_count(), 1);

        notifier.remove_listener(&listener).unwrap();
        assert!(notifier.remove_listener(&listener).is_err());
        assert_eq!(notifier.notify(CameraEvent::ExposureRead, payload()), 0);
    }

    #[tokio::test]
    async fn test_stopped_listener_runs_no_callbacks() {
        let notifier = EventNotifier::new();
        let listener = EventListener::started(EventFilter::All).await;
        notifier.register_listener(&listener);

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        listener.register_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listener.stop_listening().await;
        assert!(!listener.is_listening());
        notifier.notify(CameraSystemEvent::CameraRemoved, payload());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Restarting purges what was queued while stopped.
        listener.start_listening().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        notifier.notify(CameraSystemEvent::CameraAdded, payload());
        listener
            .wait_for([CameraSystemEvent::CameraAdded], Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_callback() {
        let listener = EventListener::new(EventFilter::All);
        let id = listener.register_callback(|_| {});
        listener.remove_callback(id).unwrap();
        assert!(listener.remove_callback(id).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let listener = EventListener::started(EventFilter::All).await;
        let result = listener
            .wait_for([CameraEvent::SetPointReached], Some(Duration::from_millis(50)))
            .await;
        assert!(result.is_none());
    }
}
