//! EarthTile - tile-keyed resource acquisition for geospatial renderers
//!
//! This library provides the data-acquisition core of a geospatial
//! rendering SDK: an HTTP client with pluggable transport backends, a
//! read-through/write-through cache keyed by URL fingerprint, a tile
//! pipeline that deduplicates concurrent fetches per tile key, and an
//! MBTiles-style local tile store.
//!
//! # High-Level API
//!
//! For most use cases, construct a [`tile::TilePipeline`] over a URL
//! template and fetch typed tile content through it:
//!
//! ```ignore
//! use earthtile::tile::{Profile, TileKey, TilePipeline};
//!
//! let pipeline = TilePipeline::builder("https://tiles.example.com/{z}/{x}/{y}.png")
//!     .profile(Profile::web_mercator())
//!     .build();
//!
//! let result = pipeline.fetch_image(&TileKey::new(14, 1000, 2000, Profile::web_mercator()), None).await;
//! ```
//!
//! Lower-level access goes through [`http::HttpClient`], which layers
//! caching and typed decoding over a replaceable wire transport.

pub mod cache;
pub mod config;
pub mod decode;
pub mod gpu;
pub mod http;
pub mod logging;
pub mod mbtiles;
pub mod progress;
pub mod result;
pub mod tile;
pub mod uri;

/// Version of the EarthTile library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
