//! Rasterized feature tiles: raster from vector.
//!
//! For each requested tile key the pipeline queries a feature source
//! for features intersecting the key's bounds expanded by a configured
//! buffer, runs them through an ordered filter chain, and paints the
//! survivors into an RGBA raster of the tile's pixel size. The paint
//! step is dispatched to the GPU job arena when one is attached
//! (standing in for a hardware rasterizer); otherwise it runs inline.

use super::{Bounds, TileKey};
use crate::config::Config;
use crate::gpu::JobArena;
use std::sync::Arc;
use thiserror::Error;
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

/// Feature geometry in profile (world) units.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Individual points.
    Points(Vec<(f64, f64)>),
    /// An open polyline.
    LineString(Vec<(f64, f64)>),
    /// A closed ring (implicitly closed between last and first vertex).
    Polygon(Vec<(f64, f64)>),
}

/// One vector feature: geometry plus attribute table.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry,
    pub attributes: Config,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            attributes: Config::new("attributes"),
        }
    }
}

/// Supplies features intersecting a bounds query. The concrete format
/// behind the source (MVT, shapefile, a database) is opaque here.
pub trait FeatureSource: Send + Sync {
    fn query(&self, bounds: &Bounds) -> Vec<Feature>;
}

/// One stage of the ordered filter chain applied before rasterization.
pub trait FeatureFilter: Send + Sync {
    fn apply(&self, features: Vec<Feature>) -> Vec<Feature>;
}

/// Paint style for rasterized features. Colors are straight RGBA8.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub fill: [u8; 4],
    pub stroke: [u8; 4],
    pub stroke_width: f32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: [128, 128, 128, 255],
            stroke: [32, 32, 32, 255],
            stroke_width: 1.0,
        }
    }
}

/// A painted tile: premultiplied RGBA8 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Rasterization failures.
#[derive(Debug, Error)]
pub enum RasterError {
    /// The arena discarded the paint job before it ran.
    #[error("rasterization job abandoned")]
    Abandoned,

    /// Tile pixel size of zero or too large for a pixmap.
    #[error("invalid raster size {0}")]
    InvalidSize(u32),
}

/// Raster-from-vector tile pipeline.
pub struct FeatureRasterPipeline {
    source: Arc<dyn FeatureSource>,
    filters: Vec<Arc<dyn FeatureFilter>>,
    style: Style,
    /// Query-bounds expansion in world units, so features just outside
    /// the tile still contribute strokes that bleed in.
    buffer: f64,
    tile_size: u32,
    arena: Option<Arc<JobArena>>,
}

impl FeatureRasterPipeline {
    pub fn new(source: Arc<dyn FeatureSource>) -> Self {
        Self {
            source,
            filters: Vec::new(),
            style: Style::default(),
            buffer: 0.0,
            tile_size: 256,
            arena: None,
        }
    }

    /// Appends a filter stage; stages run in the order added.
    pub fn with_filter(mut self, filter: Arc<dyn FeatureFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Dispatches paint work to the given arena instead of painting
    /// inline.
    pub fn with_arena(mut self, arena: Arc<JobArena>) -> Self {
        self.arena = Some(arena);
        self
    }

    /// Produces the raster for one tile key.
    pub async fn rasterize(&self, key: &TileKey) -> Result<RasterTile, RasterError> {
        let query_bounds = key.bounds().expanded(self.buffer);
        let mut features = self.source.query(&query_bounds);
        for filter in &self.filters {
            features = filter.apply(features);
        }

        let bounds = key.bounds();
        let size = self.tile_size;
        let style = self.style;

        match &self.arena {
            Some(arena) => arena
                .dispatch(move |_gpu| paint_features(&features, &bounds, size, &style))
                .await
                .map_err(|_| RasterError::Abandoned)?,
            None => paint_features(&features, &bounds, size, &style),
        }
    }
}

/// Paints features into a tile-sized pixmap. World coordinates map
/// with north up: the bounds' ymax lands on pixel row zero.
fn paint_features(
    features: &[Feature],
    bounds: &Bounds,
    size: u32,
    style: &Style,
) -> Result<RasterTile, RasterError> {
    let mut pixmap = Pixmap::new(size, size).ok_or(RasterError::InvalidSize(size))?;

    let to_px = |(wx, wy): (f64, f64)| -> (f32, f32) {
        let px = (wx - bounds.xmin) / bounds.width() * size as f64;
        let py = (bounds.ymax - wy) / bounds.height() * size as f64;
        (px as f32, py as f32)
    };

    let mut fill = Paint::default();
    fill.set_color_rgba8(style.fill[0], style.fill[1], style.fill[2], style.fill[3]);
    fill.anti_alias = true;

    let mut stroke_paint = Paint::default();
    stroke_paint.set_color_rgba8(
        style.stroke[0],
        style.stroke[1],
        style.stroke[2],
        style.stroke[3],
    );
    stroke_paint.anti_alias = true;

    let stroke = Stroke {
        width: style.stroke_width.max(0.1),
        ..Stroke::default()
    };

    for feature in features {
        match &feature.geometry {
            Geometry::Points(points) => {
                for &point in points {
                    let (x, y) = to_px(point);
                    if let Some(path) =
                        PathBuilder::from_circle(x, y, style.stroke_width.max(1.0))
                    {
                        pixmap.fill_path(&path, &fill, FillRule::Winding, Transform::identity(), None);
                    }
                }
            }
            Geometry::LineString(points) => {
                if let Some(path) = build_path(points, &to_px, false) {
                    pixmap.stroke_path(&path, &stroke_paint, &stroke, Transform::identity(), None);
                }
            }
            Geometry::Polygon(ring) => {
                if let Some(path) = build_path(ring, &to_px, true) {
                    pixmap.fill_path(&path, &fill, FillRule::Winding, Transform::identity(), None);
                    if style.stroke_width > 0.0 {
                        pixmap.stroke_path(
                            &path,
                            &stroke_paint,
                            &stroke,
                            Transform::identity(),
                            None,
                        );
                    }
                }
            }
        }
    }

    Ok(RasterTile {
        width: size,
        height: size,
        rgba: pixmap.take(),
    })
}

fn build_path(
    points: &[(f64, f64)],
    to_px: &impl Fn((f64, f64)) -> (f32, f32),
    close: bool,
) -> Option<tiny_skia::Path> {
    if points.len() < 2 {
        return None;
    }
    let mut pb = PathBuilder::new();
    let (x, y) = to_px(points[0]);
    pb.move_to(x, y);
    for &point in &points[1..] {
        let (x, y) = to_px(point);
        pb.line_to(x, y);
    }
    if close {
        pb.close();
    }
    pb.finish()
}
