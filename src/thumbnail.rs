use eframe::egui::ColorImage;
use tracing::debug;

/// Longest edge of the preview shown next to the progress bar.
const MAX_EDGE: u32 = 160;

/// Downloads and decodes the preview image the extractor reported.
/// Blocking; run it off the GUI thread.
pub fn fetch_thumbnail(url: &str) -> Option<ColorImage> {
    let resp = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|err| debug!(url, %err, "thumbnail fetch failed"))
        .ok()?;
    decode_thumbnail(&resp)
}

/// Decodes image bytes into an egui image, scaled down to fit the preview.
pub fn decode_thumbnail(bytes: &[u8]) -> Option<ColorImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|err| debug!(%err, "thumbnail decode failed"))
        .ok()?
        .thumbnail(MAX_EDGE, MAX_EDGE)
        .to_rgba8();
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}
