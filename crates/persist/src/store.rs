//! File-backed database images.
//!
//! ```text
//! <root>/
//!   db.meta.json                 schema version and image counter
//!   images/000001.image.cbor.zst one CBOR + zstd image per save
//!   integrity/manifest.json      sha256 of every image, chained to the previous one
//! ```
//!
//! Loading is fail-closed: a schema mismatch, a hash mismatch, an image the
//! manifest does not know about or a World that violates its invariants all
//! refuse to produce a [`Database`].

use crate::db::{Database, DatabaseImage, IMAGE_SCHEMA_VERSION, PersistError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const META_FILE: &str = "db.meta.json";
const IMAGE_DIR: &str = "images";
const INTEGRITY_DIR: &str = "integrity";
const MANIFEST_FILE: &str = "manifest.json";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("image decoding failed: {0}")]
    Decode(String),
    #[error("metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{file}: sha256 {actual} does not match manifest ({expected})")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("{file} is not listed in the manifest")]
    Unlisted { file: String },
    #[error("manifest chain broken at image {index}")]
    BrokenChain { index: u32 },
    #[error("store schema v{found} is not supported (expected v{expected})")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("image rejected: {0}")]
    Rejected(#[from] PersistError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub image_count: u32,
}

/// One saved image as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub index: u32,
    pub file: String,
    pub sha256: String,
    /// `sha256` of the previous record, `None` for the first image.
    pub prev: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    images: Vec<ImageRecord>,
}

impl Manifest {
    fn record(&self, file: &str) -> Option<&ImageRecord> {
        self.images.iter().find(|r| r.file == file)
    }

    fn head(&self) -> Option<&str> {
        self.images.last().map(|r| r.sha256.as_str())
    }
}

/// Directory of hash-chained database images. Each save appends a new image;
/// loading always uses the newest one.
pub struct DatabaseStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: Manifest,
}

impl DatabaseStore {
    /// Open the store at `path`, creating an empty one if nothing is there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(IMAGE_DIR))?;
        std::fs::create_dir_all(root.join(INTEGRITY_DIR))?;

        let mut store = Self {
            root,
            meta: StoreMeta {
                schema_version: IMAGE_SCHEMA_VERSION,
                image_count: 0,
            },
            manifest: Manifest::default(),
        };

        if store.meta_path().exists() {
            let meta: StoreMeta = read_json(&store.meta_path())?;
            if meta.schema_version != IMAGE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    found: meta.schema_version,
                    expected: IMAGE_SCHEMA_VERSION,
                });
            }
            store.meta = meta;
            if store.manifest_path().exists() {
                store.manifest = read_json(&store.manifest_path())?;
            }
        } else {
            store.flush()?;
            tracing::debug!(root = %store.root.display(), "initialized empty store");
        }
        Ok(store)
    }

    /// Load the newest image, or an empty database if none was ever saved.
    pub fn load_latest(&self) -> Result<Database, StoreError> {
        let index = self.meta.image_count;
        if index == 0 {
            return Ok(Database::new());
        }
        let image = self.read_image(index)?;
        let db = Database::from_image(image)?;
        tracing::info!(image = index, worlds = db.world_count(), "database loaded");
        Ok(db)
    }

    /// Append the committed state of `db` as a new image.
    pub fn save(&mut self, db: &Database) -> Result<(), StoreError> {
        let image = db.image();
        let index = self.meta.image_count + 1;
        let file = image_file(index);

        let bytes = encode_image(&image)?;
        let sha256 = sha256_hex(&bytes);
        std::fs::write(self.root.join(IMAGE_DIR).join(&file), &bytes)?;

        let prev = self.manifest.head().map(str::to_owned);
        self.manifest.images.push(ImageRecord {
            index,
            file,
            sha256,
            prev,
        });
        self.meta.image_count = index;
        self.flush()?;

        tracing::info!(image = index, worlds = image.worlds.len(), bytes = bytes.len(), "database saved");
        Ok(())
    }

    /// Walk the manifest checking chain links and every image's hash.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev: Option<&str> = None;
        for record in &self.manifest.images {
            if record.prev.as_deref() != prev {
                return Err(StoreError::BrokenChain {
                    index: record.index,
                });
            }
            let bytes = std::fs::read(self.root.join(IMAGE_DIR).join(&record.file))?;
            check_hash(record, &bytes)?;
            prev = Some(record.sha256.as_str());
        }
        tracing::debug!(images = self.manifest.images.len(), "store integrity verified");
        Ok(())
    }

    /// Every image the manifest knows about, oldest first.
    pub fn images(&self) -> &[ImageRecord] {
        &self.manifest.images
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn read_image(&self, index: u32) -> Result<DatabaseImage, StoreError> {
        let file = image_file(index);
        let record = self
            .manifest
            .record(&file)
            .ok_or_else(|| StoreError::Unlisted { file: file.clone() })?;
        let bytes = std::fs::read(self.root.join(IMAGE_DIR).join(&file))?;
        check_hash(record, &bytes)?;
        decode_image(&bytes)
    }

    fn flush(&self) -> Result<(), StoreError> {
        write_json(&self.meta_path(), &self.meta)?;
        write_json(&self.manifest_path(), &self.manifest)
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(INTEGRITY_DIR).join(MANIFEST_FILE)
    }
}

fn image_file(index: u32) -> String {
    format!("{index:06}.image.cbor.zst")
}

fn check_hash(record: &ImageRecord, bytes: &[u8]) -> Result<(), StoreError> {
    let actual = sha256_hex(bytes);
    if actual != record.sha256 {
        return Err(StoreError::HashMismatch {
            file: record.file.clone(),
            expected: record.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

/// CBOR, then zstd.
fn encode_image(image: &DatabaseImage) -> Result<Vec<u8>, StoreError> {
    let mut cbor = Vec::new();
    ciborium::into_writer(image, &mut cbor).map_err(|e| StoreError::Encode(e.to_string()))?;
    let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    encoder.write_all(&cbor)?;
    Ok(encoder.finish()?)
}

fn decode_image(bytes: &[u8]) -> Result<DatabaseImage, StoreError> {
    let mut cbor = Vec::new();
    zstd::Decoder::new(bytes)?.read_to_end(&mut cbor)?;
    ciborium::from_reader(cbor.as_slice()).map_err(|e| StoreError::Decode(e.to_string()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    Ok(serde_json::from_reader(std::fs::File::open(path)?)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    serde_json::to_writer_pretty(std::fs::File::create(path)?, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldgraph_common::{EventId, UserId};
    use worldgraph_kernel::{EventFields, WorldFields};

    fn populated() -> Database {
        let db = Database::new();
        let (a, b) = (EventId::new(), EventId::new());
        db.create_world(UserId::new(), WorldFields::default(), |tx| {
            tx.add_event(a, EventFields::default());
            tx.add_event(b, EventFields::default());
            tx.link(b, a).map(|_| ())
        })
        .unwrap();
        db
    }

    fn tamper(path: &Path) {
        let mut data = std::fs::read(path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(path, &data).unwrap();
    }

    #[test]
    fn fresh_store_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DatabaseStore::open(tmp.path().join("db")).unwrap();
        assert_eq!(store.meta().image_count, 0);
        assert!(store.root().join(META_FILE).is_file());
        assert!(store.images().is_empty());
        assert_eq!(store.load_latest().unwrap().world_count(), 0);
    }

    #[test]
    fn reopened_store_sees_saved_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let db = populated();
        let world = db.image().worlds[0].id();

        DatabaseStore::open(&path).unwrap().save(&db).unwrap();

        let loaded = DatabaseStore::open(&path).unwrap().load_latest().unwrap();
        assert_eq!(loaded.world_count(), 1);
        assert_eq!(loaded.read_world(world).unwrap().edge_count(), 1);
    }

    #[test]
    fn saves_form_a_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = DatabaseStore::open(tmp.path().join("db")).unwrap();
        let db = populated();
        store.save(&db).unwrap();
        store.save(&db).unwrap();

        let images = store.images();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].prev, None);
        assert_eq!(images[1].prev.as_deref(), Some(images[0].sha256.as_str()));
        store.verify_integrity().unwrap();
    }

    #[test]
    fn tampered_image_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        DatabaseStore::open(&path).unwrap().save(&populated()).unwrap();
        tamper(&path.join(IMAGE_DIR).join(image_file(1)));

        let store = DatabaseStore::open(&path).unwrap();
        assert!(matches!(
            store.verify_integrity(),
            Err(StoreError::HashMismatch { .. })
        ));
        assert!(matches!(
            store.load_latest(),
            Err(StoreError::HashMismatch { .. })
        ));
    }

    #[test]
    fn image_missing_from_manifest_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        DatabaseStore::open(&path).unwrap().save(&populated()).unwrap();
        write_json(&path.join(INTEGRITY_DIR).join(MANIFEST_FILE), &Manifest::default()).unwrap();

        let store = DatabaseStore::open(&path).unwrap();
        assert!(matches!(store.load_latest(), Err(StoreError::Unlisted { .. })));
    }

    #[test]
    fn unknown_schema_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        DatabaseStore::open(&path).unwrap();
        write_json(
            &path.join(META_FILE),
            &StoreMeta {
                schema_version: 999,
                image_count: 0,
            },
        )
        .unwrap();

        match DatabaseStore::open(&path) {
            Err(StoreError::SchemaMismatch { found, expected }) => {
                assert_eq!(found, 999);
                assert_eq!(expected, IMAGE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got {e}"),
            Ok(_) => panic!("expected SchemaMismatch, got Ok"),
        }
    }
}
