//! End-to-end viewfinder scenarios against the simulated camera.

use camera_viewfinder::distribution::{DistributorError, FrameDistributor, SoftwareGraphics};
use camera_viewfinder::fps::FrameRateEstimator;
use camera_viewfinder::session::{
    CameraParameters, CameraService, CameraSessionRegistry, SessionError, SessionState,
    SimulatedCameraService, SimulationConfig,
};
use camera_viewfinder::surface::{RecordingSurface, SurfaceHandle};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn simulated(config: SimulationConfig) -> (Arc<SimulatedCameraService>, CameraSessionRegistry) {
    let service = Arc::new(SimulatedCameraService::new(config));
    let registry = CameraSessionRegistry::new(service.clone());
    (service, registry)
}

fn distributor_with_consumers(
    width: u32,
    height: u32,
    consumers: usize,
) -> (FrameDistributor, Vec<Arc<RecordingSurface>>) {
    let distributor = FrameDistributor::new("test", Box::new(SoftwareGraphics::new()));
    let surfaces: Vec<_> = (0..consumers)
        .map(|_| {
            let surface = Arc::new(RecordingSurface::new());
            distributor
                .register_consumer(surface.clone(), width, height)
                .unwrap();
            surface
        })
        .collect();
    distributor.confirm_size(width, height).unwrap();
    (distributor, surfaces)
}

#[test]
fn frames_flow_from_camera_to_every_consumer() {
    let (service, registry) = simulated(SimulationConfig {
        native_fps: 60.0,
        seed: Some(1),
        ..Default::default()
    });
    let (distributor, surfaces) = distributor_with_consumers(640, 480, 2);
    let input = distributor.wait_input_surface(WAIT).unwrap();

    let session = registry.acquire();
    session.register_surface(input, 640, 480).unwrap();
    session.set_parameters(CameraParameters::with_target_fps(60.0)).unwrap();
    session.start().unwrap();
    session.wait_for_state(SessionState::Capturing, WAIT).unwrap();

    let estimator = FrameRateEstimator::new(60.0, "pipeline").unwrap();
    let mut previous = None;
    for _ in 0..70 {
        let arrival = distributor.await_new_frame(Some(WAIT)).unwrap();
        if let Some(prev) = previous {
            assert!(arrival.timestamp_ns > prev, "arrivals must be in camera order");
        }
        previous = Some(arrival.timestamp_ns);
        estimator.add_timestamp(arrival.timestamp_ns);
        estimator.try_compute().unwrap();
    }

    let fps = estimator.current_fps().expect("window filled");
    assert!(fps > 20.0 && fps < 120.0, "measured {} fps", fps);
    assert!(distributor.frames_distributed() >= 70);
    for surface in &surfaces {
        assert!(surface.presented_count() >= 70);
    }

    drop(session);
    distributor.release();
    assert_eq!(service.device_close_count(), 1);
    assert_eq!(
        distributor.await_new_image(),
        Err(DistributorError::Released)
    );
}

#[test]
fn second_owner_keeps_device_open() {
    let (service, registry) = simulated(SimulationConfig::default());
    let first = registry.acquire();
    let second = registry.acquire();

    first
        .register_surface(Arc::new(RecordingSurface::new()), 320, 240)
        .unwrap();
    first.start().unwrap();
    first.wait_for_state(SessionState::Capturing, WAIT).unwrap();

    first.close();
    assert_eq!(service.device_close_count(), 0);
    assert_eq!(registry.owner_count(), 1);
    assert_eq!(second.state(), SessionState::Open);

    second.close();
    assert_eq!(service.device_close_count(), 1);
    assert!(!registry.has_session());
}

#[test]
fn device_released_exactly_once_after_many_owners() {
    let (service, registry) = simulated(SimulationConfig::default());
    let handles: Vec<_> = (0..4).map(|_| registry.acquire()).collect();
    handles[0]
        .register_surface(Arc::new(RecordingSurface::new()), 320, 240)
        .unwrap();
    handles[0].start().unwrap();
    handles[0]
        .wait_for_state(SessionState::Capturing, WAIT)
        .unwrap();

    let mut handles = handles.into_iter();
    for handle in handles.by_ref().take(3) {
        handle.close();
        assert_eq!(service.device_close_count(), 0);
    }
    drop(handles);
    assert_eq!(service.device_close_count(), 1);
    assert_eq!(service.device_open_count(), 1);
}

#[test]
fn estimator_reports_thirty_fps_from_regular_arrivals() {
    let estimator = FrameRateEstimator::new(30.0, "regular").unwrap();
    let period_ns = 1_000_000_000u64 / 30;

    for i in 0..31u64 {
        estimator.add_timestamp(1_000_000 + i * period_ns);
        estimator.try_compute().unwrap();
    }

    let fps = estimator.current_fps().unwrap();
    assert!((fps - 30.0).abs() < 0.01, "got {}", fps);
}

#[test]
fn mismatched_consumer_size_rejected_at_confirmation() {
    let distributor = FrameDistributor::new("mismatch", Box::new(SoftwareGraphics::new()));
    for _ in 0..2 {
        distributor
            .register_consumer(Arc::new(RecordingSurface::new()), 1920, 1080)
            .unwrap();
    }

    assert!(matches!(
        distributor.confirm_size(1280, 720),
        Err(DistributorError::SizeMismatch { .. })
    ));
    assert!(distributor.input_surface().is_none());
}

#[test]
fn camera_frames_of_wrong_size_fail_the_distributor() {
    let (_service, registry) = simulated(SimulationConfig::default());
    let (distributor, _surfaces) = distributor_with_consumers(640, 480, 1);
    let input = distributor.wait_input_surface(WAIT).unwrap();

    // Camera configured for a different size than the distributor
    let session = registry.acquire();
    session.register_surface(input, 320, 240).unwrap();
    session.start().unwrap();
    session.wait_for_state(SessionState::Capturing, WAIT).unwrap();

    assert!(matches!(
        distributor.await_new_image(),
        Err(DistributorError::SizeMismatch { .. })
    ));
    assert!(matches!(
        distributor.await_new_image(),
        Err(DistributorError::SizeMismatch { .. })
    ));
}

#[test]
fn rejected_configuration_moves_session_to_error() {
    let (service, registry) = simulated(SimulationConfig {
        fail_configuration: true,
        ..Default::default()
    });
    let session = registry.acquire();
    session
        .register_surface(Arc::new(RecordingSurface::new()), 640, 480)
        .unwrap();
    session.start().unwrap();

    assert!(matches!(
        session.wait_for_state(SessionState::Capturing, WAIT),
        Err(SessionError::ConfigurationFailed(_))
    ));
    assert_eq!(session.start(), Err(SessionError::Unusable));

    drop(session);
    assert_eq!(service.device_close_count(), 1);

    // A fresh acquire builds a new session
    let fresh = registry.acquire();
    assert_eq!(fresh.state(), SessionState::Closed);
}

#[test]
fn device_error_surfaces_through_wait() {
    let (_service, registry) = simulated(SimulationConfig {
        open_error: Some(2),
        ..Default::default()
    });
    let session = registry.acquire();
    session
        .register_surface(Arc::new(RecordingSurface::new()), 640, 480)
        .unwrap();
    session.start().unwrap();

    assert_eq!(
        session.wait_for_state(SessionState::Capturing, WAIT),
        Err(SessionError::DeviceError {
            device_id: "0".into(),
            code: 2
        })
    );
    assert_eq!(session.last_error(), Some(SessionError::DeviceError {
        device_id: "0".into(),
        code: 2
    }));
}

#[test]
fn start_without_permission_is_refused_until_granted() {
    let (service, registry) = simulated(SimulationConfig {
        permission_granted: false,
        ..Default::default()
    });
    let session = registry.acquire();
    session
        .register_surface(Arc::new(RecordingSurface::new()), 640, 480)
        .unwrap();

    assert_eq!(
        service.permission().wait(Duration::from_millis(10), 2),
        Err(SessionError::PermissionDenied)
    );
    assert_eq!(session.start(), Err(SessionError::PermissionDenied));
    assert_eq!(session.state(), SessionState::Closed);

    service.permission().grant();
    session.start().unwrap();
    session.wait_for_state(SessionState::Capturing, WAIT).unwrap();
}

#[test]
fn consumers_cannot_join_after_first_frame() {
    let (_service, registry) = simulated(SimulationConfig::default());
    let (distributor, _surfaces) = distributor_with_consumers(640, 480, 1);
    let input: SurfaceHandle = distributor.wait_input_surface(WAIT).unwrap();

    let session = registry.acquire();
    session.register_surface(input, 640, 480).unwrap();
    session.start().unwrap();
    distributor.await_new_frame(Some(WAIT)).unwrap();

    assert_eq!(
        distributor
            .register_consumer(Arc::new(RecordingSurface::new()), 640, 480)
            .map(|_| ()),
        Err(DistributorError::CaptureStarted)
    );
}

#[test]
fn dropping_consumer_skips_frames_while_others_continue() {
    let (_service, registry) = simulated(SimulationConfig {
        native_fps: 60.0,
        ..Default::default()
    });
    let distributor = FrameDistributor::new("drops", Box::new(SoftwareGraphics::new()));
    let preview = Arc::new(RecordingSurface::new());
    let encoder = Arc::new(RecordingSurface::new());
    distributor.register_consumer(preview.clone(), 320, 240).unwrap();
    let encoder_control = distributor
        .register_consumer(encoder.clone(), 320, 240)
        .unwrap();
    distributor.confirm_size(320, 240).unwrap();
    encoder_control.drop_next(true);

    let session = registry.acquire();
    session
        .register_surface(distributor.wait_input_surface(WAIT).unwrap(), 320, 240)
        .unwrap();
    session.start().unwrap();

    for _ in 0..10 {
        distributor.await_new_frame(Some(WAIT)).unwrap();
    }

    assert!(preview.presented_count() >= 10);
    assert_eq!(encoder.presented_count(), 0);
    assert!(encoder_control.skipped() >= 10);
}
