//! MBTiles-style local tile store and SQLite cache-bin backend.
//!
//! On-disk schema follows the MBTiles convention:
//! `tiles(zoom_level, tile_column, tile_row, tile_data)` plus a
//! `metadata(name, value)` table. `tile_row` uses the TMS convention
//! (row zero at the south edge), so rows are flipped from the XYZ
//! convention on both read and write.
//!
//! All statements are serialized behind one mutex; the contract here
//! is correctness before concurrency, regardless of how SQLite was
//! built.

use crate::cache::{Cache, CacheBin, CacheError, CacheRecord, RecordStatus};
use crate::config::Config;
use crate::decode::{encode_image, DecodeError, Decoder, ImageDecoder};
use crate::result::ReadValue;
use crate::tile::{Bounds, Profile, TileKey};
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Local tile store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid metadata value for {name}: {value}")]
    InvalidMetadata { name: String, value: String },
}

/// Converts an XYZ row to the TMS row stored on disk.
fn tms_row(key: &TileKey) -> u32 {
    (1u32 << key.lod()) - 1 - key.y()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// SQLite tile archive with the read/write contract of a tile source.
pub struct MbtilesStore {
    conn: Arc<Mutex<Connection>>,
    format: String,
    compression: Option<String>,
    profile: Profile,
    bounds: Option<Bounds>,
    min_level: Option<u8>,
    max_level: Option<u8>,
}

impl MbtilesStore {
    /// Opens (or creates) an archive.
    ///
    /// Metadata keys `format`, `compression`, `profile`, `minzoom`,
    /// `maxzoom`, and `bounds` are read on open. `format` falls back
    /// to the supplied default and is stored once so later writers
    /// stay consistent. With `compute_levels`, existing rows are
    /// scanned for distinct zoom levels to populate the min/max.
    pub fn open(
        path: impl AsRef<Path>,
        default_format: Option<&str>,
        compute_levels: bool,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT);
             CREATE TABLE IF NOT EXISTS tiles (
                 zoom_level INTEGER,
                 tile_column INTEGER,
                 tile_row INTEGER,
                 tile_data BLOB);
             CREATE UNIQUE INDEX IF NOT EXISTS tile_index
                 ON tiles (zoom_level, tile_column, tile_row);",
        )?;

        let mut metadata = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (name, value) = row?;
                metadata.insert(name, value);
            }
        }

        let format = match metadata.get("format") {
            Some(format) => format.clone(),
            None => {
                let format = default_format.unwrap_or("png").to_string();
                // store the tile format once so every writer agrees
                conn.execute(
                    "INSERT INTO metadata (name, value) VALUES ('format', ?1)",
                    params![format],
                )?;
                format
            }
        };

        let compression = metadata.get("compression").cloned();

        let profile = match metadata.get("profile") {
            Some(name) => {
                Profile::from_name(name).ok_or_else(|| StoreError::InvalidMetadata {
                    name: "profile".into(),
                    value: name.clone(),
                })?
            }
            None => Profile::WebMercator,
        };

        let bounds = match metadata.get("bounds") {
            Some(raw) => Some(parse_bounds(raw).ok_or_else(|| StoreError::InvalidMetadata {
                name: "bounds".into(),
                value: raw.clone(),
            })?),
            None => None,
        };

        let mut min_level = metadata.get("minzoom").and_then(|v| v.trim().parse().ok());
        let mut max_level = metadata.get("maxzoom").and_then(|v| v.trim().parse().ok());

        if compute_levels {
            let mut stmt = conn.prepare("SELECT DISTINCT zoom_level FROM tiles")?;
            let levels = stmt.query_map([], |row| row.get::<_, u8>(0))?;
            for level in levels {
                let level = level?;
                min_level = Some(min_level.map_or(level, |m: u8| m.min(level)));
                max_level = Some(max_level.map_or(level, |m: u8| m.max(level)));
            }
            debug!(?min_level, ?max_level, "Computed zoom levels from tile rows");
        }

        info!(
            path = %path.as_ref().display(),
            format = %format,
            profile = profile.name(),
            "Opened tile archive"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            format,
            compression,
            profile,
            bounds,
            min_level,
            max_level,
        })
    }

    /// Stored tile image format (`png`, `jpg`, ...).
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn compression(&self) -> Option<&str> {
        self.compression.as_deref()
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Geographic extents from the `bounds` metadata row, if present.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// (min, max) zoom levels known for this archive.
    pub fn levels(&self) -> (Option<u8>, Option<u8>) {
        (self.min_level, self.max_level)
    }

    /// Reads one tile's raw blob. `Ok(None)` when the tile is absent.
    pub fn read_tile(&self, key: &TileKey) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let blob = conn
            .query_row(
                "SELECT tile_data FROM tiles
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![key.lod(), key.x(), tms_row(key)],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob)
    }

    /// Reads and decodes one tile image.
    pub fn read_image(&self, key: &TileKey) -> Result<Option<image::DynamicImage>, StoreError> {
        let blob = match self.read_tile(key)? {
            Some(blob) => blob,
            None => return Ok(None),
        };
        match ImageDecoder.decode(&blob)? {
            ReadValue::Image(image) => Ok(Some(image)),
            _ => Err(StoreError::Decode(DecodeError::Failed(
                "tile blob decoded to a non-image payload".into(),
            ))),
        }
    }

    /// Encodes an image in the archive's format and writes it.
    pub fn write_tile(&self, key: &TileKey, image: &image::DynamicImage) -> Result<(), StoreError> {
        let blob = encode_image(image, &self.format)?;
        self.write_blob(key, &blob)
    }

    /// Writes a pre-encoded tile blob, replacing any existing tile.
    pub fn write_blob(&self, key: &TileKey, blob: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.lod(), key.x(), tms_row(key), blob],
        )?;
        Ok(())
    }

    /// Number of tiles stored.
    pub fn tile_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get::<_, i64>(0))?;
        Ok(count as u64)
    }

    /// Reads one metadata value.
    pub fn metadata(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Writes one metadata value, replacing any previous value.
    pub fn set_metadata(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM metadata WHERE name = ?1", params![name])?;
        conn.execute(
            "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }
}

fn parse_bounds(raw: &str) -> Option<Bounds> {
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f64>());
    let west = parts.next()?.ok()?;
    let south = parts.next()?.ok()?;
    let east = parts.next()?.ok()?;
    let north = parts.next()?.ok()?;
    Some(Bounds::new(west, south, east, north))
}

/// SQLite-backed cache with the standard bin contract. Each bin is a
/// `res_<id>` table of `(key, data, metadata, modified)` rows in one
/// database file, so a tile archive and the URL cache can share a
/// single file.
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    bins: Mutex<HashMap<String, Arc<SqliteBin>>>,
}

impl SqliteCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            bins: Mutex::new(HashMap::new()),
        })
    }

    fn table_for(id: &str) -> String {
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("res_{}", safe)
    }
}

impl Cache for SqliteCache {
    fn add_bin(&self, id: &str) -> Arc<dyn CacheBin> {
        let mut bins = self.bins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bin) = bins.get(id) {
            return bin.clone();
        }
        let table = Self::table_for(id);
        {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     key TEXT PRIMARY KEY,
                     data BLOB NOT NULL,
                     metadata TEXT NOT NULL,
                     modified INTEGER NOT NULL);"
            )) {
                warn!(bin = id, error = %e, "Failed to create cache bin table");
            }
        }
        let bin = Arc::new(SqliteBin {
            conn: self.conn.clone(),
            table,
        });
        bins.insert(id.to_string(), bin.clone());
        bin
    }

    fn bin(&self, id: &str) -> Option<Arc<dyn CacheBin>> {
        let bins = self.bins.lock().unwrap_or_else(|e| e.into_inner());
        bins.get(id).map(|b| b.clone() as Arc<dyn CacheBin>)
    }

    fn default_bin(&self) -> Arc<dyn CacheBin> {
        self.add_bin("__default")
    }
}

/// One SQLite-backed cache bin.
pub struct SqliteBin {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl CacheBin for SqliteBin {
    fn read(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row = conn
            .query_row(
                &format!("SELECT data, metadata, modified FROM {} WHERE key = ?1", self.table),
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        match row {
            Some((data, metadata, modified)) => {
                let metadata =
                    Config::from_json(&metadata).map_err(|e| CacheError::CorruptMetadata {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(CacheRecord {
                    data: Bytes::from(data),
                    metadata,
                    last_modified: UNIX_EPOCH + Duration::from_secs(modified.max(0) as u64),
                }))
            }
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, data: &[u8], metadata: &Config) -> Result<(), CacheError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, data, metadata, modified)
                 VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![key, data, metadata.to_json(), epoch_secs() as i64],
        )
        .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    fn touch(&self, key: &str) -> bool {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            &format!("UPDATE {} SET modified = ?1 WHERE key = ?2", self.table),
            params![epoch_secs() as i64, key],
        )
        .map(|rows| rows > 0)
        .unwrap_or(false)
    }

    fn remove(&self, key: &str) -> bool {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.table),
            params![key],
        )
        .map(|rows| rows > 0)
        .unwrap_or(false)
    }

    fn record_status(&self, key: &str) -> RecordStatus {
        match self.read(key) {
            Ok(Some(_)) => RecordStatus::Ok,
            Ok(None) => RecordStatus::NotFound,
            Err(_) => RecordStatus::IoError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn red_tile() -> image::DynamicImage {
        image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([255, 0, 0, 255]),
        ))
    }

    #[test]
    fn test_open_creates_schema_and_stores_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tiles.mbtiles");
        let store = MbtilesStore::open(&path, Some("png"), false).unwrap();
        assert_eq!(store.format(), "png");
        assert_eq!(store.profile(), Profile::WebMercator);

        // reopening without a default keeps the stored format
        drop(store);
        let store = MbtilesStore::open(&path, None, false).unwrap();
        assert_eq!(store.format(), "png");
    }

    #[test]
    fn test_tile_round_trip_with_tms_flip() {
        let tmp = TempDir::new().unwrap();
        let store =
            MbtilesStore::open(tmp.path().join("t.mbtiles"), Some("png"), false).unwrap();
        let key = TileKey::new(3, 2, 1, Profile::WebMercator);

        store.write_tile(&key, &red_tile()).unwrap();

        // stored row uses TMS convention: 2^3 - 1 - 1 = 6
        {
            let conn = store.conn.lock().unwrap();
            let row: i64 = conn
                .query_row(
                    "SELECT tile_row FROM tiles WHERE zoom_level = 3 AND tile_column = 2",
                    [],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(row, 6);
        }

        let image = store.read_image(&key).unwrap().unwrap();
        assert_eq!(image.width(), 8);
        assert!(store.read_tile(&key).unwrap().is_some());

        let missing = TileKey::new(3, 0, 0, Profile::WebMercator);
        assert!(store.read_tile(&missing).unwrap().is_none());
    }

    #[test]
    fn test_compute_levels_scans_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("levels.mbtiles");
        let store = MbtilesStore::open(&path, Some("png"), false).unwrap();
        for lod in [4u8, 7, 5] {
            let key = TileKey::new(lod, 0, 0, Profile::WebMercator);
            store.write_tile(&key, &red_tile()).unwrap();
        }
        drop(store);

        let store = MbtilesStore::open(&path, None, true).unwrap();
        assert_eq!(store.levels(), (Some(4), Some(7)));
    }

    #[test]
    fn test_metadata_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store =
            MbtilesStore::open(tmp.path().join("m.mbtiles"), Some("jpg"), false).unwrap();
        store.set_metadata("bounds", "-180,-85,180,85").unwrap();
        assert_eq!(
            store.metadata("bounds").unwrap().as_deref(),
            Some("-180,-85,180,85")
        );
        store.set_metadata("bounds", "-10,-10,10,10").unwrap();
        assert_eq!(
            store.metadata("bounds").unwrap().as_deref(),
            Some("-10,-10,10,10")
        );
    }

    #[test]
    fn test_bounds_metadata_parsed_on_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("b.mbtiles");
        let store = MbtilesStore::open(&path, Some("png"), false).unwrap();
        store.set_metadata("bounds", "-10, -20, 30, 40").unwrap();
        drop(store);

        let store = MbtilesStore::open(&path, None, false).unwrap();
        assert_eq!(store.bounds(), Some(Bounds::new(-10.0, -20.0, 30.0, 40.0)));
    }

    #[test]
    fn test_sqlite_bin_contract() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteCache::open(tmp.path().join("cache.db")).unwrap();
        let bin = cache.default_bin();

        let mut meta = Config::new("response-headers");
        meta.set("content-type", "image/png");

        bin.write("http://example.com/a.png", b"\x89PNG", &meta).unwrap();
        let record = bin.read("http://example.com/a.png").unwrap().unwrap();
        assert_eq!(record.data.as_ref(), b"\x89PNG");
        assert_eq!(record.metadata.get("content-type"), Some("image/png"));
        assert_eq!(bin.record_status("http://example.com/a.png"), RecordStatus::Ok);

        assert!(bin.touch("http://example.com/a.png"));
        assert!(!bin.touch("missing"));
        assert!(bin.remove("http://example.com/a.png"));
        assert!(bin.read("http://example.com/a.png").unwrap().is_none());
    }
}
