use super::*;
use crate::camera::SimulatedFactory;
use crate::config::CameraEntry;
use crate::error::SdkError;
use crate::events::{Event, EventFilter, Notification};
use crate::notifier::EventListener;
use crate::sdk::SimulatedSystem;

fn config_with(cameras: &[(&str, &str, bool)]) -> BasecamConfig {
    let mut config = BasecamConfig::default();
    for (name, uid, autoconnect) in cameras {
        config.cameras.insert(
            name.to_string(),
            CameraEntry {
                uid: uid.to_string(),
                autoconnect: *autoconnect,
                auto_shutter: true,
                ..Default::default()
            },
        );
    }
    config
}

fn system_with(devices: usize, config: BasecamConfig) -> (Arc<CameraSystem>, Arc<SimulatedSystem>) {
    let vendor = Arc::new(SimulatedSystem::with_devices(devices));
    let factory = Arc::new(SimulatedFactory::new(Arc::clone(&vendor)));
    let system = CameraSystem::new(vendor.clone(), factory, config).unwrap();
    (system, vendor)
}

async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn names(system: &CameraSystem) -> Vec<String> {
    let mut names: Vec<String> = system
        .cameras()
        .iter()
        .map(|camera| camera.name().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_repeated_uids_rejected() {
    let vendor = Arc::new(SimulatedSystem::new());
    let factory = Arc::new(SimulatedFactory::new(Arc::clone(&vendor)));
    let config = config_with(&[("a", "DEV_0001", false), ("b", "DEV_0001", false)]);
    assert!(CameraSystem::new(vendor, factory, config).is_err());
}

#[test]
fn test_get_camera_config() {
    let (system, _) = system_with(0, config_with(&[("sim1", "DEV_0001", true)]));

    let by_name = system.get_camera_config(Some("sim1"), None).unwrap();
    assert_eq!(by_name.uid.as_deref(), Some("DEV_0001"));
    assert!(by_name.autoconnect);

    let by_uid = system.get_camera_config(None, Some("DEV_0001")).unwrap();
    assert_eq!(by_uid.name, "sim1");

    // An unknown name still falls through to the uid.
    let fallback = system
        .get_camera_config(Some("other"), Some("DEV_0001"))
        .unwrap();
    assert_eq!(fallback.name, "sim1");

    assert!(system.get_camera_config(Some("other"), None).is_none());
    assert!(system.get_camera_config(None, Some("DEV_9999")).is_none());
}

#[tokio::test]
async fn test_add_configured_camera() {
    let (system, _) = system_with(1, config_with(&[("sim1", "DEV_0001", true)]));
    let listener = EventListener::started(EventFilter::only([CameraSystemEvent::CameraAdded])).await;
    let added: Arc<parking_lot::Mutex<Vec<Notification>>> = Default::default();
    let sink = Arc::clone(&added);
    listener.register_callback(move |notification| sink.lock().push(notification.clone()));
    system.notifier().register_listener(&listener);

    let camera = system
        .add_camera(Some("sim1"), None, false, CameraOverrides::default())
        .await
        .unwrap();

    assert!(camera.is_connected());
    assert_eq!(camera.uid().as_deref(), Some("DEV_0001"));
    assert_eq!(camera.version(), Some("0.1.0"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let added = added.lock().clone();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].event, Event::System(CameraSystemEvent::CameraAdded));
    assert_eq!(added[0].payload.name.as_deref(), Some("sim1"));
    assert_eq!(added[0].payload.uid.as_deref(), Some("DEV_0001"));

    // Adding again returns the camera already handled.
    let again = system
        .add_camera(None, Some("DEV_0001"), false, CameraOverrides::default())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&camera, &again));
    assert_eq!(system.cameras().len(), 1);
}

#[tokio::test]
async fn test_add_camera_requires_name_or_uid() {
    let (system, _) = system_with(1, BasecamConfig::default());
    let err = system
        .add_camera(None, None, false, CameraOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BasecamError::System { .. }));
}

#[tokio::test]
async fn test_add_unconfigured_camera_uses_placeholder() {
    let (system, _) = system_with(2, BasecamConfig::default());

    let camera = system
        .add_camera(None, Some("DEV_0002"), false, CameraOverrides::default())
        .await
        .unwrap();
    assert_eq!(camera.name(), "DEV_0002");
    assert!(!camera.is_connected());

    let overrides = CameraOverrides {
        autoconnect: Some(true),
        ..Default::default()
    };
    let connected = system
        .add_camera(None, Some("DEV_0001"), false, overrides)
        .await
        .unwrap();
    assert!(connected.is_connected());
}

#[tokio::test]
async fn test_failed_autoconnect_does_not_add() {
    let (system, _) = system_with(0, config_with(&[("sim1", "DEV_0001", true)]));

    let err = system
        .add_camera(Some("sim1"), None, false, CameraOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BasecamError::Connection { .. }));
    assert!(system.cameras().is_empty());
}

#[tokio::test]
async fn test_get_camera() {
    let (system, _) = system_with(2, config_with(&[("sim1", "DEV_0001", false)]));

    assert!(system.get_camera(None, None).unwrap().is_none());

    system
        .add_camera(Some("sim1"), None, false, CameraOverrides::default())
        .await
        .unwrap();
    let only = system.get_camera(None, None).unwrap().unwrap();
    assert_eq!(only.name(), "sim1");

    system
        .add_camera(None, Some("DEV_0002"), false, CameraOverrides::default())
        .await
        .unwrap();
    assert!(system.get_camera(None, None).unwrap().is_none());

    let by_uid = system.get_camera(None, Some("DEV_0002")).unwrap().unwrap();
    assert_eq!(by_uid.name(), "DEV_0002");

    assert!(system.get_camera(Some("sim1"), Some("DEV_0002")).is_err());
    assert!(system.get_camera(Some("missing"), None).unwrap().is_none());
}

#[tokio::test]
async fn test_remove_camera() {
    let (system, _) = system_with(1, config_with(&[("sim1", "DEV_0001", true)]));
    let listener = EventListener::started(EventFilter::only([CameraSystemEvent::CameraRemoved])).await;
    system.notifier().register_listener(&listener);

    let camera = system
        .add_camera(Some("sim1"), None, false, CameraOverrides::default())
        .await
        .unwrap();

    let waiter = listener.wait_for([CameraSystemEvent::CameraRemoved], Some(Duration::from_secs(1)));
    let (result, seen) = tokio::join!(system.remove_camera(None, Some("DEV_0001")), waiter);
    result.unwrap();

    assert!(seen.is_some());
    assert!(!camera.is_connected());
    assert!(system.cameras().is_empty());

    let err = system.remove_camera(Some("sim1"), None).await.unwrap_err();
    assert!(matches!(err, BasecamError::NotFound { .. }));
}

#[tokio::test]
async fn test_list_available_cameras() {
    let (system, vendor) = system_with(2, BasecamConfig::default());
    assert_eq!(
        system.list_available_cameras().unwrap(),
        vec!["DEV_0001".to_string(), "DEV_0002".to_string()]
    );

    vendor.set_failure(Some(SdkError::NotImplemented));
    let err = system.list_available_cameras().unwrap_err();
    assert!(err.is_not_implemented());
}

#[tokio::test]
async fn test_check_cameras_reconciles() {
    let (system, vendor) = system_with(1, config_with(&[("sim1", "DEV_0001", false)]));

    system.check_cameras().await.unwrap();
    assert_eq!(names(&system), vec!["sim1"]);

    // Forced cameras survive even when the vendor does not list them.
    system
        .add_camera(Some("bench"), Some("DEV_0042"), true, CameraOverrides::default())
        .await
        .unwrap();

    vendor.plug(SimulatedSystem::device("DEV_0002"));
    vendor.unplug("DEV_0001");
    system.check_cameras().await.unwrap();
    assert_eq!(names(&system), vec!["DEV_0002", "bench"]);
}

#[tokio::test]
async fn test_camera_poller() {
    let (system, vendor) = system_with(1, BasecamConfig::default());

    system
        .start_camera_poller(Some(Duration::from_millis(10)))
        .await;
    assert!(system.is_polling().await);

    assert!(wait_until(|| system.cameras().len() == 1).await);

    vendor.plug(SimulatedSystem::device("DEV_0002"));
    assert!(wait_until(|| system.cameras().len() == 2).await);

    vendor.unplug("DEV_0001");
    assert!(wait_until(|| names(&system) == vec!["DEV_0002"]).await);

    system.stop_camera_poller().await;
    assert!(!system.is_polling().await);
}

#[tokio::test]
async fn test_poller_stops_when_listing_not_implemented() {
    let (system, vendor) = system_with(1, BasecamConfig::default());
    vendor.set_failure(Some(SdkError::NotImplemented));

    system
        .start_camera_poller(Some(Duration::from_millis(10)))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!system.is_polling().await);
    assert!(system.cameras().is_empty());
}

#[tokio::test]
async fn test_start_respects_poll_on_start() {
    let (idle, _) = system_with(1, BasecamConfig::default());
    idle.start().await;
    assert!(!idle.is_polling().await);

    let mut config = BasecamConfig::default();
    config.system.poll_on_start = true;
    config.system.poll_interval_seconds = 0.01;
    let (polling, _) = system_with(1, config);
    polling.start().await;
    assert!(polling.is_polling().await);
    polling.shutdown().await;
    assert!(!polling.is_polling().await);
}

#[tokio::test]
async fn test_connection_callbacks() {
    let (system, _) = system_with(1, config_with(&[("sim1", "DEV_0001", true)]));

    let camera = system.on_camera_connected("DEV_0001").await.unwrap().unwrap();
    assert_eq!(camera.name(), "sim1");
    assert!(camera.is_connected());

    system
        .on_camera_disconnected("DEV_0001")
        .await
        .unwrap()
        .unwrap();
    assert!(system.cameras().is_empty());
}

#[tokio::test]
async fn test_shutdown_disconnects_cameras() {
    let (system, _) = system_with(1, config_with(&[("sim1", "DEV_0001", true)]));
    let camera = system
        .add_camera(Some("sim1"), None, false, CameraOverrides::default())
        .await
        .unwrap();
    assert!(camera.is_connected());

    system.shutdown().await;
    assert!(!camera.is_connected());
}

#[tokio::test]
async fn test_cameras_use_exposure_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with(&[("sim1", "DEV_0001", true)]);
    config.exposure.directory = dir.path().to_str().unwrap().to_string();
    config.exposure.basename = "{camera.uid}-{num:03}.fits".to_string();
    let (system, _) = system_with(1, config);

    let camera = system
        .add_camera(Some("sim1"), None, false, CameraOverrides::default())
        .await
        .unwrap();
    let exposure = camera
        .object(
            0.1,
            crate::camera::ExposeOptions {
                write: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(exposure.filename, Some(dir.path().join("DEV_0001-001.fits")));
}
