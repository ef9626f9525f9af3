use std::ffi::c_void;

use cidre::{api, arc, av, cg, ns};
use objc::{class, msg_send, runtime::Object, sel, sel_impl};
use reel_media::{
    CaptureError,
    geometry::{DeviceCatalog, DeviceInfo, DisplayInfo, Rect},
};
use tracing::*;

/// Displays from CoreGraphics, cameras and microphones from AVFoundation
/// discovery sessions. The main display is always listed first.
#[derive(Clone, Copy, Debug, Default)]
pub struct MacDeviceCatalog;

impl DeviceCatalog for MacDeviceCatalog {
    fn displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        let main = cg::DirectDisplayId::main();

        let mut ids = active_display_ids()?;
        ids.sort_by_key(|id| *id != main.0);

        Ok(ids.into_iter().map(display_info).collect())
    }

    fn cameras(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let mut device_types = vec![av::CaptureDeviceType::built_in_wide_angle_camera()];
        if api::macos_available("14.0") {
            device_types.extend(unsafe { av::CaptureDeviceType::external() });
        }

        Ok(discover(&device_types, av::MediaType::video()))
    }

    fn microphones(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let mut device_types = vec![av::CaptureDeviceType::built_in_microphone()];
        if api::macos_available("14.0") {
            device_types.extend(unsafe { av::CaptureDeviceType::microphone() });
        }

        let mut devices = discover(&device_types, av::MediaType::audio());

        // Older systems only discover built-in microphones.
        if let Some(default) = av::CaptureDevice::default_with_media(av::MediaType::audio()) {
            let default = device_info(&default);
            match devices.iter().position(|d| d.id == default.id) {
                Some(index) => {
                    let default = devices.remove(index);
                    devices.insert(0, default);
                }
                None => devices.insert(0, default),
            }
        }

        Ok(devices)
    }
}

fn discover(
    device_types: &[&av::CaptureDeviceType],
    media_type: &av::MediaType,
) -> Vec<DeviceInfo> {
    let device_types = ns::Array::from_slice(device_types);

    let session = av::CaptureDeviceDiscoverySession::with_device_types_media_and_pos(
        &device_types,
        Some(media_type),
        av::CaptureDevicePos::Unspecified,
    );

    session
        .devices()
        .iter()
        .map(device_info)
        .collect()
}

fn device_info(device: &av::CaptureDevice) -> DeviceInfo {
    DeviceInfo {
        id: device.unique_id().to_string(),
        name: device.localized_name().to_string(),
    }
}

pub(crate) fn find_device(id: &str) -> Option<arc::R<av::CaptureDevice>> {
    av::CaptureDevice::with_unique_id(&ns::String::with_str(id))
}

fn active_display_ids() -> Result<Vec<u32>, CaptureError> {
    const MAX_DISPLAYS: u32 = 32;

    let mut ids = [0u32; MAX_DISPLAYS as usize];
    let mut count = 0u32;

    let err = unsafe { CGGetActiveDisplayList(MAX_DISPLAYS, ids.as_mut_ptr(), &mut count) };
    if err != 0 {
        return Err(CaptureError::Start(format!("CGGetActiveDisplayList: {err}")));
    }

    Ok(ids[..count as usize].to_vec())
}

fn display_info(id: u32) -> DisplayInfo {
    let display = cg::DirectDisplayId(id);
    let bounds = display.bounds();

    let (native_width, native_height) =
        native_pixel_size(id).unwrap_or((display.pixels_wide(), display.pixels_high()));

    let scale = if bounds.size.width > 0.0 {
        native_width as f64 / bounds.size.width
    } else {
        1.0
    };

    let name = screen_name(id).unwrap_or_else(|| format!("Display {id}"));
    trace!(id, %name, ?bounds, native_width, native_height, "Found display");

    DisplayInfo {
        id,
        name,
        frame: Rect::new(
            bounds.origin.x,
            bounds.origin.y,
            bounds.size.width,
            bounds.size.height,
        ),
        scale,
        native_width: native_width as u32,
        native_height: native_height as u32,
    }
}

fn native_pixel_size(id: u32) -> Option<(usize, usize)> {
    let mode = unsafe { CGDisplayCopyDisplayMode(id) };
    if mode.is_null() {
        return None;
    }

    let size = unsafe {
        (
            CGDisplayModeGetPixelWidth(mode),
            CGDisplayModeGetPixelHeight(mode),
        )
    };

    unsafe { CGDisplayModeRelease(mode) };

    Some(size)
}

fn screen_name(id: u32) -> Option<String> {
    unsafe {
        let screens: *mut Object = msg_send![class!(NSScreen), screens];
        if screens.is_null() {
            return None;
        }

        let key = ns::String::with_str("NSScreenNumber");
        let count: usize = msg_send![screens, count];

        for index in 0..count {
            let screen: *mut Object = msg_send![screens, objectAtIndex: index];
            let description: *mut Object = msg_send![screen, deviceDescription];
            let key_id = &*key as *const ns::String as *mut Object;
            let number: *mut Object = msg_send![description, objectForKey: key_id];
            if number.is_null() {
                continue;
            }

            let screen_id: u32 = msg_send![number, unsignedIntValue];
            if screen_id != id {
                continue;
            }

            let name: *mut Object = msg_send![screen, localizedName];
            if name.is_null() {
                return None;
            }
            return Some((*(name as *const ns::String)).to_string());
        }
    }

    None
}

#[link(name = "AppKit", kind = "framework")]
unsafe extern "C" {}

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGGetActiveDisplayList(max_displays: u32, displays: *mut u32, count: *mut u32) -> i32;
    fn CGDisplayCopyDisplayMode(display: u32) -> *mut c_void;
    fn CGDisplayModeGetPixelWidth(mode: *mut c_void) -> usize;
    fn CGDisplayModeGetPixelHeight(mode: *mut c_void) -> usize;
    fn CGDisplayModeRelease(mode: *mut c_void);
}
