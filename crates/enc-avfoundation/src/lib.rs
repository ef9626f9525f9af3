//! macOS backend: ScreenCaptureKit and AVFoundation capture sources, plus
//! `AVAssetWriter`/`AVAssetReader` containers for the recorder and the
//! post-processing passes.
#![cfg(target_os = "macos")]

mod backend;
mod bridge;
mod camera;
mod capture_device;
mod devices;
mod microphone;
mod reader;
mod sample;
mod screen;
mod writer;

pub use backend::AvBackend;
pub use camera::{CameraSource, ensure_camera_access};
pub use devices::MacDeviceCatalog;
pub use microphone::{MicrophoneSource, ensure_microphone_access};
pub use reader::AvReader;
pub use sample::AvSample;
pub use screen::{
    ScreenSource, has_permission as has_screen_permission,
    request_permission as request_screen_permission,
};
pub use writer::AvWriter;
