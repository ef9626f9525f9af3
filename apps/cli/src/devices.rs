use anyhow::Context;
use reel_enc_avfoundation::MacDeviceCatalog;
use reel_media::geometry::{DeviceCatalog, compute_capture_geometry};

pub fn list() -> anyhow::Result<()> {
    let catalog = MacDeviceCatalog;

    println!("Displays:");
    for (index, display) in catalog.displays().context("Listing displays")?.iter().enumerate() {
        let geometry = compute_capture_geometry(
            display.frame,
            display.scale,
            display.native_width,
            display.native_height,
        );
        println!(
            "  {index}: {} (id {}, {}x{} px @ {}x)",
            display.name,
            display.id,
            geometry.pixel_width,
            geometry.pixel_height,
            geometry.point_pixel_scale
        );
    }

    println!("Cameras:");
    for (index, camera) in catalog.cameras().context("Listing cameras")?.iter().enumerate() {
        println!("  {index}: {} ({})", camera.name, camera.id);
    }

    println!("Microphones:");
    for (index, mic) in catalog.microphones().context("Listing microphones")?.iter().enumerate() {
        println!("  {index}: {} ({})", mic.name, mic.id);
    }

    Ok(())
}
