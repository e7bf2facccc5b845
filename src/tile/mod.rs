//! Tile keys, tiling profiles, and the keygated fetch pipeline.

mod keygate;
mod pipeline;
pub mod raster;
mod template;

pub use keygate::{GateEntry, Keygate, KeygateStats};
pub use pipeline::{TilePipeline, TilePipelineBuilder};
pub use template::UrlTemplate;

/// Axis-aligned bounds in profile units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Bounds {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Grows the bounds by `buffer` units on every side.
    pub fn expanded(&self, buffer: f64) -> Self {
        Self {
            xmin: self.xmin - buffer,
            ymin: self.ymin - buffer,
            xmax: self.xmax + buffer,
            ymax: self.ymax + buffer,
        }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.xmin <= other.xmax
            && self.xmax >= other.xmin
            && self.ymin <= other.ymax
            && self.ymax >= other.ymin
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }
}

/// Half the Web Mercator world span in meters.
const MERC_HALF_SPAN: f64 = 20_037_508.342_789_244;

/// Tiling scheme: coordinate system plus root tile grid. Source and
/// cache must share a profile for tile keys to be compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Spherical Mercator (EPSG:3857); one root tile.
    WebMercator,
    /// Geographic WGS84 (EPSG:4326); two root tiles side by side.
    Wgs84,
}

impl Profile {
    pub fn web_mercator() -> Self {
        Profile::WebMercator
    }

    pub fn wgs84() -> Self {
        Profile::Wgs84
    }

    /// Well-known profile name, as stored in tile-archive metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Profile::WebMercator => "mercator",
            Profile::Wgs84 => "geodetic",
        }
    }

    /// Parses a well-known profile name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mercator" | "spherical-mercator" | "epsg:3857" => Some(Profile::WebMercator),
            "geodetic" | "wgs84" | "epsg:4326" => Some(Profile::Wgs84),
            _ => None,
        }
    }

    /// Root tile grid (columns, rows) at level 0.
    pub fn root_tiles(&self) -> (u32, u32) {
        match self {
            Profile::WebMercator => (1, 1),
            Profile::Wgs84 => (2, 1),
        }
    }

    /// Tile grid dimensions (columns, rows) at the given level.
    pub fn tiles_at(&self, lod: u8) -> (u32, u32) {
        let (cols, rows) = self.root_tiles();
        (cols << lod, rows << lod)
    }

    /// Full world extent in profile units.
    pub fn extent(&self) -> Bounds {
        match self {
            Profile::WebMercator => {
                Bounds::new(-MERC_HALF_SPAN, -MERC_HALF_SPAN, MERC_HALF_SPAN, MERC_HALF_SPAN)
            }
            Profile::Wgs84 => Bounds::new(-180.0, -90.0, 180.0, 90.0),
        }
    }

    /// World bounds of one tile. Row 0 is the northernmost row
    /// (XYZ convention).
    pub fn tile_bounds(&self, key: &TileKey) -> Bounds {
        let (cols, rows) = self.tiles_at(key.lod());
        let extent = self.extent();
        let tile_w = extent.width() / cols as f64;
        let tile_h = extent.height() / rows as f64;
        let xmin = extent.xmin + key.x() as f64 * tile_w;
        let ymax = extent.ymax - key.y() as f64 * tile_h;
        Bounds::new(xmin, ymax - tile_h, xmin + tile_w, ymax)
    }
}

/// Identity of one tile: level, column, row, and tiling profile. Two
/// keys are equal iff all four components match; equality defines the
/// keygate bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    lod: u8,
    x: u32,
    y: u32,
    profile: Profile,
}

impl TileKey {
    pub fn new(lod: u8, x: u32, y: u32, profile: Profile) -> Self {
        Self { lod, x, y, profile }
    }

    pub fn lod(&self) -> u8 {
        self.lod
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Row index with the vertical axis flipped (`2^lod - 1 - y`), as
    /// used by TMS archives and `{-y}` URL templates.
    pub fn inverted_y(&self) -> u32 {
        (1u32 << self.lod) - 1 - self.y
    }

    /// World bounds of this tile in its profile.
    pub fn bounds(&self) -> Bounds {
        self.profile.tile_bounds(self)
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{} ({})", self.lod, self.x, self.y, self.profile.name())
    }
}
