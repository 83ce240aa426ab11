//! SVG synthesis and rasterization of vector path nodes.

use std::io::Cursor;

/// Hard limit for either raster dimension.
const MAX_DIM: u32 = 8_192;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid svg: {0}")]
    Svg(String),
    #[error("invalid raster size {0}x{1}")]
    Size(u32, u32),
    #[error("png encoding failed: {0}")]
    Encode(String),
}

/// A path ready to draw: raw path data and its resolved color.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub data: String,
    pub color: String,
}

/// Build a standalone SVG document embedding every path at the node's declared size.
pub fn build_svg(paths: &[ResolvedPath], width: f64, height: f64) -> String {
    let width = width.max(1.0);
    let height = height.max(1.0);
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    );
    for path in paths.iter().filter(|p| !p.data.trim().is_empty()) {
        svg.push_str(&format!(
            r#"<path d="{}" fill="{}"/>"#,
            escape_attr(&path.data),
            escape_attr(&path.color)
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Rasterize an SVG document to PNG bytes at `scale` device pixels per unit.
pub fn rasterize_svg_to_png(svg: &str, scale: f32) -> Result<Vec<u8>, RenderError> {
    let opts = usvg::Options::default();
    let tree = usvg::Tree::from_str(svg, &opts).map_err(|e| RenderError::Svg(e.to_string()))?;

    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    let size = tree.size();
    let width = (size.width() * scale).ceil().max(1.0) as u32;
    let height = (size.height() * scale).ceil().max(1.0) as u32;
    if width > MAX_DIM || height > MAX_DIM {
        return Err(RenderError::Size(width, height));
    }

    let mut pixmap =
        resvg::tiny_skia::Pixmap::new(width, height).ok_or(RenderError::Size(width, height))?;
    let sx = width as f32 / size.width();
    let sy = height as f32 / size.height();
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::from_scale(sx, sy),
        &mut pixmap.as_mut(),
    );

    // tiny-skia stores premultiplied RGBA; PNG wants straight alpha.
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    let img = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| RenderError::Encode("pixel buffer size mismatch".to_string()))?;

    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(buf)
}
