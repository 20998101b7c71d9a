use std::io::Cursor;
use tiny_skia::Pixmap;

use crate::rendering::EngineError;

/// Encode an opaque pixmap as 8-bit RGB PNG.
///
/// The alpha channel is dropped, so callers must have painted an opaque
/// background first (premultiplied data then equals straight RGB).
pub fn encode_rgb(pixmap: &Pixmap) -> Result<Vec<u8>, EngineError> {
    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    encode(pixmap.width(), pixmap.height(), png::ColorType::Rgb, &rgb)
}

/// Encode a pixmap with transparency as 8-bit RGBA PNG
pub fn encode_rgba(pixmap: &Pixmap) -> Result<Vec<u8>, EngineError> {
    pixmap
        .encode_png()
        .map_err(|e| EngineError::Capture(format!("PNG encode error: {e}")))
}

fn encode(
    width: u32,
    height: u32,
    color_type: png::ColorType,
    data: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = png::Encoder::new(&mut buf, width, height);
        encoder.set_color(color_type);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);
        let mut writer = encoder
            .write_header()
            .map_err(|e| EngineError::Capture(format!("PNG encode error: {e}")))?;
        writer
            .write_image_data(data)
            .map_err(|e| EngineError::Capture(format!("PNG encode error: {e}")))?;
    }
    Ok(buf.into_inner())
}

/// Re-compress PNG data with oxipng; returns the input when optimization fails
pub fn optimize(png_bytes: Vec<u8>) -> Vec<u8> {
    match oxipng::optimize_from_memory(
        &png_bytes,
        &oxipng::Options {
            strip: oxipng::StripChunks::Safe,
            optimize_alpha: false,
            ..Default::default()
        },
    ) {
        Ok(optimized) if optimized.len() < png_bytes.len() => optimized,
        Ok(_) => png_bytes,
        Err(e) => {
            tracing::debug!(error = %e, "PNG optimization failed, keeping original");
            png_bytes
        }
    }
}

/// Read width and height from a PNG header
pub fn dimensions(png_bytes: &[u8]) -> Option<(u32, u32)> {
    let decoder = png::Decoder::new(Cursor::new(png_bytes));
    let reader = decoder.read_info().ok()?;
    let info = reader.info();
    Some((info.width, info.height))
}
