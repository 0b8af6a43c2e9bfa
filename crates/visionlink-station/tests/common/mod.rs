//! Common test utilities for station integration tests.
//!
//! A [`Rig`] wires an [`InspectionController`] to a mock controller, a mock
//! camera and a scripted detector, and keeps the handles that play the
//! controller side.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use visionlink_core::{BoundingBox, ClassCatalog, ClassId, Detection};
use visionlink_hardware::mock::{MockCamera, MockCameraHandle, MockPlc, MockPlcHandle, ScriptedDetector};
use visionlink_hardware::{AnyTransport, Endpoint};
use visionlink_station::{CyclePolicy, DeviceLink, InspectionController, RegisterProtocol, RetryPolicy};

/// Data block used throughout the tests.
pub const DB: u16 = 4;

pub type MockController = InspectionController<MockCamera, ScriptedDetector>;

pub struct Rig {
    pub controller: Arc<MockController>,
    pub plc: MockPlcHandle,
    pub camera: MockCameraHandle,
}

impl Rig {
    pub fn link(&self) -> &Arc<DeviceLink> {
        self.controller.link()
    }

    pub fn detector(&self) -> &ScriptedDetector {
        self.controller.detector()
    }
}

pub fn class(id: u16) -> ClassId {
    ClassId::new(id).unwrap()
}

pub fn detection(id: u16, confidence: f32) -> Detection {
    let bbox = BoundingBox::new(120.0, 80.0, 360.0, 300.0).unwrap();
    Detection::new(class(id), confidence, bbox).unwrap()
}

pub fn policy() -> CyclePolicy {
    CyclePolicy {
        confidence_floor: 0.1,
        fallback_class: class(2),
        capture_fallback_class: class(2),
        trigger_window: Duration::from_millis(100),
        max_retries: 3,
    }
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        retry_delay: Duration::from_millis(20),
    }
}

/// Rig with a custom detector and policy; the link is not connected yet.
pub fn rig_with(detector: ScriptedDetector, policy: CyclePolicy) -> Rig {
    let (plc, plc_handle) = MockPlc::new(DB);
    let link = DeviceLink::new(
        Endpoint::default().with_db(DB),
        AnyTransport::Mock(plc),
        retry_policy(),
    );
    let (camera, camera_handle) = MockCamera::with_size(64, 48);

    let controller = InspectionController::new(
        RegisterProtocol::new(Arc::new(link)),
        camera,
        detector,
        policy,
        ClassCatalog::default(),
    );

    Rig {
        controller: Arc::new(controller),
        plc: plc_handle,
        camera: camera_handle,
    }
}

/// Default rig with the link already up.
pub async fn connected_rig() -> Rig {
    let rig = rig_with(ScriptedDetector::new(), policy());
    assert!(rig.link().connect().await);
    rig
}
