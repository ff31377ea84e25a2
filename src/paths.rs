//! On-disk layout, symlink path encoding and id generation.
//!
//! A collection lives under `<storage>/collections/<name>/`:
//!
//! ```text
//! <name>.json                  manifest
//! <name>.lock                  collection lock artifact
//! array_data/<id>.json         metadata record
//! array_data/<id>.dat          body (absent until first write)
//! array_data/<id>.lock         per-array lock artifact
//! array_symlinks/<p1>/…/<id>.json    symlink to the metadata record
//! varray_data/…, varray_symlinks/…   (virtual array collections)
//! ```
//!
//! The symlink tree encodes the primary attribute values in declared order,
//! one attribute per directory, which makes lookup by primary attribute
//! tuple a direct filesystem resolution — and the cross-process mechanism
//! for rejecting duplicate keys. Segments use a canonical, filesystem-safe
//! encoding: datetimes in ISO-8601 UTC, tuple elements joined with the
//! reserved `~` separator, everything else percent-escaped.

use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use uuid::Uuid;

use crate::value::AttrValue;

/// Directory of all collections under a storage root.
pub const COLLECTIONS_DIR: &str = "collections";
/// Directory of per-array files inside a collection.
pub const ARRAY_DATA_DIR: &str = "array_data";
/// Directory of the primary-attribute symlink tree for arrays.
pub const ARRAY_SYMLINKS_DIR: &str = "array_symlinks";
/// Directory of per-virtual-array files inside a varray collection.
pub const VARRAY_DATA_DIR: &str = "varray_data";
/// Directory of the primary-attribute symlink tree for virtual arrays.
pub const VARRAY_SYMLINKS_DIR: &str = "varray_symlinks";
/// Extension of metadata records and manifests.
pub const META_EXT: &str = "json";
/// Extension of lock artifacts.
pub const LOCK_EXT: &str = "lock";

/// The reserved separator joining tuple elements inside one path segment.
pub const TUPLE_SEPARATOR: char = '~';

/// Characters escaped inside string path segments: controls, the escape
/// character itself, the tuple separator, path separators and spaces.
const SEGMENT_ESCAPES: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b'~')
    .add(b'/')
    .add(b'\\')
    .add(b' ')
    .add(b'.');

/// Encode one attribute value as a filesystem-safe path segment.
#[must_use]
pub fn encode_segment(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => utf8_percent_encode(s, SEGMENT_ESCAPES).to_string(),
        AttrValue::Tuple(values) => values
            .iter()
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join(&TUPLE_SEPARATOR.to_string()),
        other => other.canonical_string(),
    }
}

/// A random array id.
#[must_use]
pub fn new_array_id() -> Uuid {
    Uuid::new_v4()
}

/// The deterministic id of a virtual array: a UUIDv5 of the collection name
/// and the canonical primary attribute tuple, so that re-creation from the
/// same key is idempotent and duplicates collide.
#[must_use]
pub fn varray_id(collection: &str, primary: &[(String, AttrValue)]) -> Uuid {
    let key = primary
        .iter()
        .map(|(name, value)| format!("{name}={}", value.canonical_string()))
        .collect::<Vec<_>>()
        .join(";");
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{collection}/{key}").as_bytes(),
    )
}

/// The deterministic id of a tile of a virtual array.
#[must_use]
pub fn tile_id(vid: &Uuid, position: &[u64]) -> Uuid {
    let key = position
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{vid}/{key}").as_bytes())
}

/// The directory tree of one collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionPaths {
    name: String,
    root: PathBuf,
}

impl CollectionPaths {
    /// The paths of collection `name` under `storage_root`.
    #[must_use]
    pub fn new(storage_root: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            root: storage_root.join(COLLECTIONS_DIR).join(name),
        }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The manifest path, `<name>.json`.
    #[must_use]
    pub fn manifest(&self) -> PathBuf {
        self.root.join(format!("{}.{META_EXT}", self.name))
    }

    /// The collection lock artifact, `<name>.lock`.
    #[must_use]
    pub fn lock(&self) -> PathBuf {
        self.root.join(format!("{}.{LOCK_EXT}", self.name))
    }

    /// The data directory for arrays or virtual arrays.
    #[must_use]
    pub fn data_dir(&self, varray: bool) -> PathBuf {
        self.root.join(if varray {
            VARRAY_DATA_DIR
        } else {
            ARRAY_DATA_DIR
        })
    }

    /// The symlink tree root for arrays or virtual arrays.
    #[must_use]
    pub fn symlinks_dir(&self, varray: bool) -> PathBuf {
        self.root.join(if varray {
            VARRAY_SYMLINKS_DIR
        } else {
            ARRAY_SYMLINKS_DIR
        })
    }

    /// The metadata record path of one array.
    #[must_use]
    pub fn meta_path(&self, id: &Uuid, varray: bool) -> PathBuf {
        self.data_dir(varray).join(format!("{id}.{META_EXT}"))
    }

    /// The body path of one array, with the adapter's data extension.
    #[must_use]
    pub fn body_path(&self, id: &Uuid, extension: &str, varray: bool) -> PathBuf {
        self.data_dir(varray).join(format!("{id}.{extension}"))
    }

    /// The lock artifact path of one array.
    #[must_use]
    pub fn lock_path(&self, id: &Uuid, varray: bool) -> PathBuf {
        self.data_dir(varray).join(format!("{id}.{LOCK_EXT}"))
    }

    /// The symlink directory of one primary attribute tuple: one encoded
    /// segment per attribute, in declared order.
    #[must_use]
    pub fn symlink_dir(&self, primary: &[(String, AttrValue)], varray: bool) -> PathBuf {
        let mut dir = self.symlinks_dir(varray);
        for (_, value) in primary {
            dir.push(encode_segment(value));
        }
        dir
    }

    /// The symlink leaf of one array inside its [`symlink_dir`](Self::symlink_dir).
    #[must_use]
    pub fn symlink_path(
        &self,
        primary: &[(String, AttrValue)],
        id: &Uuid,
        varray: bool,
    ) -> PathBuf {
        self.symlink_dir(primary, varray)
            .join(format!("{id}.{META_EXT}"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn segment_encoding() {
        assert_eq!(encode_segment(&AttrValue::Int(-3)), "-3");
        assert_eq!(
            encode_segment(&AttrValue::Str("a/b c~d%e".to_string())),
            "a%2Fb%20c%7Ed%25e"
        );
        let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            encode_segment(&AttrValue::Datetime(dt)),
            "2023-01-01T00:00:00+00:00"
        );
        assert_eq!(
            encode_segment(&crate::value::int_tuple(&[0, 2, 1])),
            "0~2~1"
        );
    }

    #[test]
    fn varray_ids_are_stable_and_keyed() {
        let primary = vec![("run".to_string(), AttrValue::Int(1))];
        let a = varray_id("weather", &primary);
        let b = varray_id("weather", &primary);
        assert_eq!(a, b);
        let other = varray_id("weather", &[("run".to_string(), AttrValue::Int(2))]);
        assert_ne!(a, other);
        assert_ne!(a, varray_id("climate", &primary));

        let vid = Uuid::new_v4();
        assert_eq!(tile_id(&vid, &[0, 1]), tile_id(&vid, &[0, 1]));
        assert_ne!(tile_id(&vid, &[0, 1]), tile_id(&vid, &[1, 0]));
    }

    #[test]
    fn collection_layout() {
        let paths = CollectionPaths::new(Path::new("/data"), "weather");
        assert_eq!(
            paths.manifest(),
            Path::new("/data/collections/weather/weather.json")
        );
        assert_eq!(
            paths.data_dir(false),
            Path::new("/data/collections/weather/array_data")
        );
        assert_eq!(
            paths.symlinks_dir(true),
            Path::new("/data/collections/weather/varray_symlinks")
        );
        let id = Uuid::nil();
        assert_eq!(
            paths.meta_path(&id, false),
            Path::new("/data/collections/weather/array_data")
                .join("00000000-0000-0000-0000-000000000000.json")
        );
        let primary = vec![
            ("day".to_string(), AttrValue::Str("mon".to_string())),
            ("run".to_string(), AttrValue::Int(4)),
        ];
        assert_eq!(
            paths.symlink_dir(&primary, false),
            Path::new("/data/collections/weather/array_symlinks/mon/4")
        );
    }
}
