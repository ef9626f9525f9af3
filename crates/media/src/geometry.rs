use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::CaptureError;

/// Smallest pixel dimension handed to an encoder.
pub const MIN_DIMENSION: u32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }
}

/// Pixel geometry of a capture, derived once per recording.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureGeometry {
    pub source_rect: Rect,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub point_pixel_scale: f64,
}

/// Maps a logical rect and point-to-pixel scale to pixel dimensions.
///
/// Degenerate input (non-positive size or scale) falls back to a 1:1
/// mapping of `fallback_width` x `fallback_height`.
pub fn compute_capture_geometry(
    rect: Rect,
    scale: f64,
    fallback_width: u32,
    fallback_height: u32,
) -> CaptureGeometry {
    if rect.is_degenerate() || !scale.is_finite() || scale <= 0.0 {
        let pixel_width = fallback_width.max(MIN_DIMENSION);
        let pixel_height = fallback_height.max(MIN_DIMENSION);

        return CaptureGeometry {
            source_rect: Rect::new(0.0, 0.0, pixel_width as f64, pixel_height as f64),
            pixel_width,
            pixel_height,
            point_pixel_scale: 1.0,
        };
    }

    CaptureGeometry {
        source_rect: rect,
        pixel_width: ((rect.width * scale).round() as u32).max(MIN_DIMENSION),
        pixel_height: ((rect.height * scale).round() as u32).max(MIN_DIMENSION),
        point_pixel_scale: scale,
    }
}

/// How a user picks a display or device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
    Id(String),
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        Ok(if s.is_empty() || s.eq_ignore_ascii_case("default") {
            Self::Default
        } else if let Ok(index) = s.parse::<usize>() {
            Self::Index(index)
        } else {
            Self::Id(s.to_string())
        })
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Index(index) => write!(f, "#{index}"),
            Self::Id(id) => write!(f, "'{id}'"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub id: u32,
    pub name: String,
    pub frame: Rect,
    pub scale: f64,
    pub native_width: u32,
    pub native_height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// Enumerates what can be captured on this machine.
pub trait DeviceCatalog {
    fn displays(&self) -> Result<Vec<DisplayInfo>, CaptureError>;

    fn cameras(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    fn microphones(&self) -> Result<Vec<DeviceInfo>, CaptureError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDisplay {
    pub display: DisplayInfo,
    pub geometry: CaptureGeometry,
}

pub fn resolve_display(
    catalog: &impl DeviceCatalog,
    selector: &DeviceSelector,
) -> Result<ResolvedDisplay, CaptureError> {
    let displays = catalog.displays()?;
    if displays.is_empty() {
        return Err(CaptureError::NoDisplays);
    }

    let display = match selector {
        DeviceSelector::Default => displays.into_iter().next(),
        DeviceSelector::Index(index) => displays.into_iter().nth(*index),
        DeviceSelector::Id(id) => displays
            .into_iter()
            .find(|d| d.id.to_string() == *id || d.name.eq_ignore_ascii_case(id)),
    }
    .ok_or_else(|| CaptureError::DeviceNotFound(format!("display {selector}")))?;

    let geometry = compute_capture_geometry(
        display.frame,
        display.scale,
        display.native_width,
        display.native_height,
    );

    Ok(ResolvedDisplay { display, geometry })
}

pub fn resolve_camera(
    catalog: &impl DeviceCatalog,
    selector: &DeviceSelector,
) -> Result<DeviceInfo, CaptureError> {
    select_device(catalog.cameras()?, selector, "camera")
}

pub fn resolve_microphone(
    catalog: &impl DeviceCatalog,
    selector: &DeviceSelector,
) -> Result<DeviceInfo, CaptureError> {
    select_device(catalog.microphones()?, selector, "microphone")
}

fn select_device(
    devices: Vec<DeviceInfo>,
    selector: &DeviceSelector,
    what: &str,
) -> Result<DeviceInfo, CaptureError> {
    match selector {
        DeviceSelector::Default => devices.into_iter().next(),
        DeviceSelector::Index(index) => devices.into_iter().nth(*index),
        DeviceSelector::Id(id) => devices
            .into_iter()
            .find(|d| d.id == *id || d.name.eq_ignore_ascii_case(id)),
    }
    .ok_or_else(|| CaptureError::DeviceNotFound(format!("{what} {selector}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retina_display() {
        let geometry = compute_capture_geometry(Rect::new(0.0, 0.0, 1920.0, 1080.0), 2.0, 1, 1);

        assert_eq!(geometry.pixel_width, 3840);
        assert_eq!(geometry.pixel_height, 2160);
        assert_eq!(geometry.point_pixel_scale, 2.0);
    }

    #[test]
    fn degenerate_geometry_falls_back() {
        let cases = [
            (Rect::new(0.0, 0.0, 0.0, 1080.0), 2.0),
            (Rect::new(0.0, 0.0, 1920.0, -5.0), 2.0),
            (Rect::new(0.0, 0.0, 1920.0, 1080.0), 0.0),
            (Rect::new(0.0, 0.0, 1920.0, 1080.0), -1.0),
            (Rect::new(0.0, 0.0, f64::NAN, 1080.0), 1.0),
        ];

        for (rect, scale) in cases {
            let geometry = compute_capture_geometry(rect, scale, 1512, 982);
            assert_eq!(geometry.pixel_width, 1512, "{rect:?} @ {scale}");
            assert_eq!(geometry.pixel_height, 982, "{rect:?} @ {scale}");
            assert_eq!(geometry.point_pixel_scale, 1.0);
        }
    }

    #[test]
    fn dimensions_never_drop_below_minimum() {
        let geometry = compute_capture_geometry(Rect::new(0.0, 0.0, 0.4, 0.4), 1.0, 0, 0);
        assert!(geometry.pixel_width >= MIN_DIMENSION);
        assert!(geometry.pixel_height >= MIN_DIMENSION);

        let fallback = compute_capture_geometry(Rect::default(), 1.0, 0, 1);
        assert_eq!((fallback.pixel_width, fallback.pixel_height), (2, 2));
    }

    struct Catalog;

    impl DeviceCatalog for Catalog {
        fn displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
            Ok(vec![
                DisplayInfo {
                    id: 1,
                    name: "Built-in Retina Display".into(),
                    frame: Rect::new(0.0, 0.0, 1512.0, 982.0),
                    scale: 2.0,
                    native_width: 3024,
                    native_height: 1964,
                },
                DisplayInfo {
                    id: 7,
                    name: "LG UltraFine".into(),
                    frame: Rect::new(1512.0, 0.0, 2560.0, 1440.0),
                    scale: 0.0,
                    native_width: 2560,
                    native_height: 1440,
                },
            ])
        }

        fn cameras(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
            Ok(vec![DeviceInfo {
                id: "0x1420000005ac8600".into(),
                name: "FaceTime HD Camera".into(),
            }])
        }

        fn microphones(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
            Ok(vec![])
        }
    }

    #[test]
    fn resolves_selectors() {
        let primary = resolve_display(&Catalog, &DeviceSelector::Default).unwrap();
        assert_eq!(primary.geometry.pixel_width, 3024);

        let external = resolve_display(&Catalog, &"7".parse().unwrap());
        assert!(matches!(external, Err(CaptureError::DeviceNotFound(_))));

        let external = resolve_display(&Catalog, &DeviceSelector::Id("7".into())).unwrap();
        assert_eq!(external.geometry.pixel_width, 2560);
        assert_eq!(external.geometry.point_pixel_scale, 1.0);

        let camera = resolve_camera(&Catalog, &"facetime hd camera".parse().unwrap()).unwrap();
        assert_eq!(camera.id, "0x1420000005ac8600");

        assert!(resolve_microphone(&Catalog, &DeviceSelector::Default).is_err());
    }
}
