use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::time::SystemTime;

/// Events emitted by the camera system itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraSystemEvent {
    CameraAdded,
    CameraRemoved,
}

/// Events emitted by individual cameras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraEvent {
    CameraConnected,
    CameraConnectFailed,
    CameraDisconnected,
    CameraDisconnectFailed,
    ExposureFlushing,
    ExposureIntegrating,
    ExposureReading,
    ExposureRead,
    ExposureFailed,
    ExposureWriting,
    ExposureWritten,
    NewSetPoint,
    SetPointReached,
}

impl CameraEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CameraEvent::CameraConnected => "connected",
            CameraEvent::CameraConnectFailed => "connect_failed",
            CameraEvent::CameraDisconnected => "disconnected",
            CameraEvent::CameraDisconnectFailed => "disconnect_failed",
            CameraEvent::ExposureFlushing => "flushing",
            CameraEvent::ExposureIntegrating => "integrating",
            CameraEvent::ExposureReading => "reading",
            CameraEvent::ExposureRead => "read",
            CameraEvent::ExposureFailed => "failed",
            CameraEvent::ExposureWriting => "writing",
            CameraEvent::ExposureWritten => "written",
            CameraEvent::NewSetPoint => "new_set_point",
            CameraEvent::SetPointReached => "set_point_reached",
        }
    }
}

impl CameraSystemEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CameraSystemEvent::CameraAdded => "camera_added",
            CameraSystemEvent::CameraRemoved => "camera_removed",
        }
    }
}

/// Any event that can travel through the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    System(CameraSystemEvent),
    Camera(CameraEvent),
}

impl Event {
    /// Stable snake-case name, used for filtering and logging
    pub fn name(&self) -> &'static str {
        match self {
            Event::System(event) => event.name(),
            Event::Camera(event) => event.name(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<CameraEvent> for Event {
    fn from(event: CameraEvent) -> Self {
        Event::Camera(event)
    }
}

impl From<CameraSystemEvent> for Event {
    fn from(event: CameraSystemEvent) -> Self {
        Event::System(event)
    }
}

/// Information attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: Option<String>,
    pub uid: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl EventPayload {
    pub fn for_camera(name: &str, uid: Option<&str>) -> Self {
        Self {
            name: Some(name.to_string()),
            uid: uid.map(str::to_string),
            extra: Map::new(),
        }
    }

    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// An event together with its payload and the time it was emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: Event,
    pub payload: EventPayload,
    pub timestamp: SystemTime,
}

impl Notification {
    pub fn new(event: Event, payload: EventPayload) -> Self {
        Self {
            event,
            payload,
            timestamp: SystemTime::now(),
        }
    }

    /// Get a human-readable description of the notification
    pub fn description(&self) -> String {
        match (&self.payload.name, &self.payload.uid) {
            (Some(name), Some(uid)) => format!("{} ({}, {})", self.event, name, uid),
            (Some(name), None) => format!("{} ({})", self.event, name),
            (None, Some(uid)) => format!("{} ({})", self.event, uid),
            (None, None) => self.event.name().to_string(),
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Accept all events
    #[default]
    All,
    /// Accept only the listed events
    Events(HashSet<Event>),
}

impl EventFilter {
    pub fn only<I, E>(events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        EventFilter::Events(events.into_iter().map(Into::into).collect())
    }

    /// Check if an event passes this filter
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Events(events) => events.contains(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Event::from(CameraEvent::ExposureFailed).name(), "failed");
        assert_eq!(
            Event::from(CameraSystemEvent::CameraAdded).to_string(),
            "camera_added"
        );
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::only([CameraEvent::ExposureRead, CameraEvent::ExposureFailed]);

        assert!(filter.matches(&CameraEvent::ExposureRead.into()));
        assert!(!filter.matches(&CameraEvent::CameraConnected.into()));
        assert!(!filter.matches(&CameraSystemEvent::CameraAdded.into()));
        assert!(EventFilter::All.matches(&CameraSystemEvent::CameraAdded.into()));
    }

    #[test]
    fn test_payload_and_description() {
        let payload = EventPayload::for_camera("sim1", Some("DEV_0001")).with("temperature", -20.0);
        assert_eq!(payload.get("temperature"), Some(&Value::from(-20.0)));

        let notification = Notification::new(CameraEvent::NewSetPoint.into(), payload);
        assert_eq!(notification.description(), "new_set_point (sim1, DEV_0001)");
    }

    #[test]
    fn test_payload_serializes() {
        let payload = EventPayload::for_camera("sim1", None).with("error", "timeout");
        let json = serde_json::to_string(&payload).unwrap();
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
