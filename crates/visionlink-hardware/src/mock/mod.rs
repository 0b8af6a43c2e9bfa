//! Mock devices for development and testing.

pub mod camera;
pub mod detector;
pub mod plc;

pub use camera::{MockCamera, MockCameraHandle};
pub use detector::ScriptedDetector;
pub use plc::{MockPlc, MockPlcHandle, WriteRecord};
