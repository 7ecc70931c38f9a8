//! Line plot tool.
//!
//! Renders a line chart (grid, axes, polyline, circular markers) into an
//! RGB canvas with the `image` crate, encodes it as PNG and returns it as a
//! `data:image/png;base64,...` URI that the chat widget can show inline.
//! Text is not rasterised; the y-axis label is only logged.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use std::io::Cursor;
use tracing::debug;

use crate::config::PlotConfig;
use crate::traits::{Tool, ToolContext, ToolKind};

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([221, 221, 221]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);

const MARGIN_LEFT: u32 = 60;
const MARGIN_RIGHT: u32 = 24;
const MARGIN_TOP: u32 = 30;
const MARGIN_BOTTOM: u32 = 44;
const GRID_DIVISIONS: u32 = 5;
const MARKER_RADIUS: i64 = 4;

pub struct FundPlotTool {
    config: PlotConfig,
}

impl FundPlotTool {
    pub fn new(config: PlotConfig) -> Self {
        Self { config }
    }
}

/// Render `y` against `x` and return a PNG data URI.
pub fn generate_plot(x: &[f64], y: &[f64], y_label: &str, config: &PlotConfig) -> Result<String> {
    debug!(label = y_label, points = x.len(), "rendering plot");
    let png = render_line_plot(x, y, config.width, config.height)?;
    Ok(format!(
        "{}{}",
        PNG_DATA_URI_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

/// Render a line plot to PNG bytes.
pub fn render_line_plot(x: &[f64], y: &[f64], width: u32, height: u32) -> Result<Vec<u8>> {
    if x.len() != y.len() {
        bail!(
            "x_axis and y_data must have the same length (got {} and {})",
            x.len(),
            y.len()
        );
    }
    if x.is_empty() {
        bail!("cannot plot an empty series");
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        bail!("plot values must be finite numbers");
    }
    if width <= MARGIN_LEFT + MARGIN_RIGHT || height <= MARGIN_TOP + MARGIN_BOTTOM {
        bail!("plot canvas {}x{} is too small", width, height);
    }

    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let left = MARGIN_LEFT as i64;
    let right = (width - MARGIN_RIGHT) as i64;
    let top = MARGIN_TOP as i64;
    let bottom = (height - MARGIN_BOTTOM) as i64;

    let (x_min, x_max) = padded_range(x, 0.0);
    let (y_min, y_max) = padded_range(y, 0.05);

    let to_px = |vx: f64, vy: f64| -> (i64, i64) {
        let px = left as f64 + (vx - x_min) / (x_max - x_min) * (right - left) as f64;
        let py = bottom as f64 - (vy - y_min) / (y_max - y_min) * (bottom - top) as f64;
        (px.round() as i64, py.round() as i64)
    };

    for i in 0..=GRID_DIVISIONS as i64 {
        let gx = left + (right - left) * i / GRID_DIVISIONS as i64;
        let gy = top + (bottom - top) * i / GRID_DIVISIONS as i64;
        draw_line(&mut img, (gx, top), (gx, bottom), GRID);
        draw_line(&mut img, (left, gy), (right, gy), GRID);
    }

    draw_line(&mut img, (left, bottom), (right, bottom), AXIS);
    draw_line(&mut img, (left, top), (left, bottom), AXIS);

    let points: Vec<(i64, i64)> = x.iter().zip(y).map(|(&vx, &vy)| to_px(vx, vy)).collect();
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        draw_line(&mut img, a, b, LINE);
        draw_line(&mut img, (a.0, a.1 + 1), (b.0, b.1 + 1), LINE);
    }
    for &p in &points {
        draw_disc(&mut img, p, MARKER_RADIUS, LINE);
    }

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Data range widened by `pad` (fraction of the span); a flat series gets ±1.
fn padded_range(values: &[f64], pad: f64) -> (f64, f64) {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0, max + 1.0);
    }
    let margin = (max - min) * pad;
    (min - margin, max + margin)
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham line, clipped to the canvas.
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_disc(img: &mut RgbImage, center: (i64, i64), radius: i64, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(img, center.0 + dx, center.1 + dy, color);
            }
        }
    }
}

/// Accept numbers or numeric strings (models often send years as `"2021"`).
fn number_series(params: &Value, field: &str) -> Result<Vec<f64>> {
    let items = params[field]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("{} must be an array", field))?;
    items
        .iter()
        .map(|v| match v {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| anyhow::anyhow!("{} contains an invalid number", field)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("{} contains a non-numeric value: {}", field, s)),
            other => bail!("{} contains a non-numeric value: {}", field, other),
        })
        .collect()
}

#[async_trait]
impl Tool for FundPlotTool {
    fn name(&self) -> &str {
        "generate_fund_plot"
    }

    fn description(&self) -> &str {
        "Generate a financial trend plot for selected metric."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Plot
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "x_axis": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "X values (e.g. years)"
                },
                "y_data": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "Y values (e.g. NAV)"
                },
                "y_label": { "type": "string", "description": "Label for the y-axis (e.g. Net Asset Value)" }
            },
            "required": ["x_axis", "y_data", "y_label"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let x = number_series(&params, "x_axis")?;
        let y = number_series(&params, "y_data")?;
        let label = params["y_label"].as_str().unwrap_or("");
        Ok(Value::String(generate_plot(&x, &y, label, &self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nav_plot_is_png_data_uri() {
        let uri = generate_plot(
            &[2020.0, 2021.0, 2022.0],
            &[10.0, 12.0, 9.0],
            "NAV",
            &PlotConfig::default(),
        )
        .unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let payload = &uri[PNG_DATA_URI_PREFIX.len()..];
        let png = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), 640);
        assert_eq!(decoded.height(), 480);
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let err = render_line_plot(&[1.0, 2.0], &[1.0], 640, 480).unwrap_err();
        assert!(err.to_string().contains("same length"));
        assert!(render_line_plot(&[], &[], 640, 480).is_err());
    }

    #[test]
    fn test_single_point_and_flat_series_render() {
        assert!(render_line_plot(&[2020.0], &[5.0], 200, 150).is_ok());
        assert!(render_line_plot(&[1.0, 2.0, 3.0], &[7.0, 7.0, 7.0], 200, 150).is_ok());
    }

    #[tokio::test]
    async fn test_execute_accepts_numeric_strings() {
        let tool = FundPlotTool::new(PlotConfig::default());
        let out = tool
            .execute(
                json!({ "x_axis": ["2020", "2021"], "y_data": [1.5, 2], "y_label": "NAV" }),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.as_str().unwrap().starts_with(PNG_DATA_URI_PREFIX));

        let err = tool
            .execute(
                json!({ "x_axis": [true], "y_data": [1], "y_label": "NAV" }),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }
}
