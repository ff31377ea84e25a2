//! End-to-end scenarios over a temporary storage root.

use chrono::{Duration, TimeZone, Utc};
use gridstore::buffer::TypedBuffer;
use gridstore::client::{Client, ClientOptions};
use gridstore::collection::CollectionError;
use gridstore::schema::{
    ArraySchema, AttrKind, AttributeSchema, DimensionSchema, ElementType, TimeStart, VArraySchema,
};
use gridstore::slicing::{IndexExpr, Indexer};
use gridstore::value::AttrValue;

fn file_uri(dir: &tempfile::TempDir) -> String {
    format!("file://{}", dir.path().display())
}

fn weather_dimensions() -> Vec<DimensionSchema> {
    vec![
        DimensionSchema::time(
            "dt",
            24,
            TimeStart::Attribute("dt".to_string()),
            Duration::hours(1),
        )
        .unwrap(),
        DimensionSchema::scaled("y", 3, 90.0, -1.0, None).unwrap(),
        DimensionSchema::scaled("x", 3, -180.0, 1.0, None).unwrap(),
        DimensionSchema::labeled("w", vec!["t".into(), "h".into()]).unwrap(),
    ]
}

fn weather_attributes() -> Vec<AttributeSchema> {
    vec![AttributeSchema::new("dt", AttrKind::Datetime, true)]
}

fn ones(len: usize) -> TypedBuffer {
    TypedBuffer::F64(vec![1.0; len])
}

#[test]
fn weather_array_fancy_read() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = ArraySchema::new(
        weather_dimensions(),
        weather_attributes(),
        ElementType::F64,
        None,
    )
    .unwrap();
    let collection = client.create_collection("weather", schema, None).unwrap();

    let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let array = collection
        .create_array(&[("dt".to_string(), AttrValue::Datetime(dt))], &[])
        .unwrap();

    let whole = array.subset(IndexExpr::all()).unwrap();
    assert_eq!(whole.shape(), vec![24, 3, 3, 2]);
    whole.update(ones(24 * 3 * 3 * 2)).unwrap();

    // [0, 0, 0, :"h"] selects one humidity-free cell run of shape (1,).
    let subset = array
        .subset(vec![
            Indexer::Int(0),
            Indexer::Int(0),
            Indexer::Int(0),
            Indexer::LabelRange {
                start: None,
                end: Some("h".into()),
            },
        ])
        .unwrap();
    assert_eq!(subset.shape(), vec![1]);
    let data = subset.read().unwrap();
    assert_eq!(data, TypedBuffer::F64(vec![1.0]));

    // Fancy lookups work across dimension kinds: a datetime, two scale
    // values and a label select a single collapsed cell.
    let cell = array
        .subset(vec![
            Indexer::Datetime(dt + Duration::hours(3)),
            Indexer::Value(89.0),
            Indexer::Value(-179.0),
            Indexer::Label("t".into()),
        ])
        .unwrap();
    assert_eq!(cell.shape(), Vec::<u64>::new());
    assert_eq!(cell.read().unwrap(), TypedBuffer::F64(vec![1.0]));
}

#[test]
fn weather_varray_tiles_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = VArraySchema::new(
        weather_dimensions(),
        weather_attributes(),
        ElementType::F64,
        None,
        Some(vec![2, 1, 3, 1]),
        None,
    )
    .unwrap();
    assert_eq!(schema.arrays_shape(), vec![12, 3, 1, 2]);
    let collection = client.create_collection("weather", schema, None).unwrap();

    let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let varray = collection
        .create_varray(&[("dt".to_string(), AttrValue::Datetime(dt))], &[])
        .unwrap();

    let whole = varray.subset(IndexExpr::all()).unwrap();
    assert_eq!(whole.num_tiles(), 6);
    whole.update(ones(24 * 3 * 3 * 2)).unwrap();

    // 2 * 1 * 3 * 1 = 6 tile bodies, each of shape (12, 3, 1, 2) float64.
    let tile_dir = dir.path().join("collections/weather/array_data");
    let bodies: Vec<_> = std::fs::read_dir(&tile_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().and_then(std::ffi::OsStr::to_str) == Some("dat"))
        .collect();
    assert_eq!(bodies.len(), 6);
    for body in bodies {
        assert_eq!(
            std::fs::metadata(body).unwrap().len(),
            12 * 3 * 1 * 2 * 8,
        );
    }

    assert_eq!(whole.read().unwrap(), ones(24 * 3 * 3 * 2));
}

#[test]
fn duplicate_primary_tuple_is_a_conflict() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = ArraySchema::new(
        vec![DimensionSchema::plain("i", 4)],
        vec![
            AttributeSchema::new("run", AttrKind::Int, true),
            AttributeSchema::new("zone", AttrKind::Str, true),
        ],
        ElementType::I32,
        None,
    )
    .unwrap();
    let collection = client.create_collection("runs", schema, None).unwrap();

    let key = vec![
        ("run".to_string(), AttrValue::Int(3)),
        ("zone".to_string(), AttrValue::Str("north".to_string())),
    ];
    let first = collection.create_array(&key, &[]).unwrap();
    first
        .subset(IndexExpr::all())
        .unwrap()
        .update(TypedBuffer::I32(vec![7, 7, 7, 7]))
        .unwrap();

    let second = collection.create_array(&key, &[]);
    assert!(matches!(
        second,
        Err(CollectionError::DuplicatePrimary { .. })
    ));

    // The first array is unchanged and still resolvable by its key.
    let found = collection.array_by_primary(&key).unwrap().unwrap();
    assert_eq!(found.id(), first.id());
    assert_eq!(
        found.subset(IndexExpr::all()).unwrap().read().unwrap(),
        TypedBuffer::I32(vec![7, 7, 7, 7])
    );
}

#[test]
fn tile_planning_covers_the_affected_grid() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    // A (100, 200) virtual array with (50, 20)-sized tiles.
    let schema = VArraySchema::new(
        vec![
            DimensionSchema::plain("y", 100),
            DimensionSchema::plain("x", 200),
        ],
        vec![AttributeSchema::new("run", AttrKind::Int, true)],
        ElementType::F64,
        None,
        None,
        Some(vec![50, 20]),
    )
    .unwrap();
    let collection = client.create_collection("grids", schema, None).unwrap();
    let varray = collection
        .create_varray(&[("run".to_string(), AttrValue::Int(0))], &[])
        .unwrap();

    let subset = varray
        .subset(vec![
            Indexer::IntRange {
                start: Some(10),
                end: Some(60),
                step: None,
            },
            Indexer::IntRange {
                start: Some(5),
                end: Some(25),
                step: None,
            },
        ])
        .unwrap();
    // Tiles {0,1} x {0,1}; aggregated shape (50, 20).
    assert_eq!(subset.num_tiles(), 4);
    assert_eq!(subset.shape(), vec![50, 20]);

    let values = TypedBuffer::F64((0..1000).map(f64::from).collect());
    subset.update(values.clone()).unwrap();
    assert_eq!(subset.read().unwrap(), values);
}

#[test]
fn varray_clear_deletes_covered_tiles() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = VArraySchema::new(
        vec![DimensionSchema::plain("i", 100)],
        vec![AttributeSchema::new("run", AttrKind::Int, true)],
        ElementType::F64,
        None,
        Some(vec![2]),
        None,
    )
    .unwrap();
    let collection = client.create_collection("grids", schema, None).unwrap();
    let varray = collection
        .create_varray(&[("run".to_string(), AttrValue::Int(0))], &[])
        .unwrap();
    varray
        .subset(IndexExpr::all())
        .unwrap()
        .update(ones(100))
        .unwrap();

    // Clearing the first tile entirely removes its body.
    let tile_dir = dir.path().join("collections/grids/array_data");
    let count_bodies = || {
        std::fs::read_dir(&tile_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().and_then(std::ffi::OsStr::to_str) == Some("dat"))
            .count()
    };
    assert_eq!(count_bodies(), 2);
    varray
        .subset(0_i64..50)
        .unwrap()
        .clear()
        .unwrap();
    assert_eq!(count_bodies(), 1);

    // Cleared cells read as fill; the rest is intact.
    let data = varray.subset(IndexExpr::all()).unwrap().read().unwrap();
    let data = data.as_slice::<f64>().unwrap();
    assert!(data[..50].iter().all(|v| v.is_nan()));
    assert!(data[50..].iter().all(|v| *v == 1.0));

    // Clearing the same bounds again leaves storage unchanged.
    varray.subset(0_i64..50).unwrap().clear().unwrap();
    assert_eq!(count_bodies(), 1);
}

#[test]
fn memory_admission_gates_subsets_and_collection_creation() {
    let dir = tempfile::TempDir::new().unwrap();
    let oversized = ArraySchema::new(
        vec![
            DimensionSchema::plain("y", 1000),
            DimensionSchema::plain("x", 1000),
        ],
        vec![],
        ElementType::F64,
        None,
    )
    .unwrap();

    // Under a 1M limit the creation itself is refused...
    let limited = Client::new(
        &file_uri(&dir),
        ClientOptions::default().with_memory_limit("1M".parse().unwrap()),
    )
    .unwrap();
    assert!(matches!(
        limited.create_collection("big", oversized.clone(), None),
        Err(gridstore::client::ClientError::Collection(
            CollectionError::Memory(_)
        ))
    ));

    // ...unless explicitly skipped.
    let skipping = Client::new(
        &file_uri(&dir),
        ClientOptions::default()
            .with_memory_limit("1M".parse().unwrap())
            .with_skip_collection_create_memory_check(true),
    )
    .unwrap();
    let collection = skipping.create_collection("big", oversized, None).unwrap();
    let array = collection.create_array(&[], &[]).unwrap();

    // A million float64 cells exceed the limit before any allocation.
    assert!(matches!(
        array.subset(IndexExpr::all()),
        Err(gridstore::array::ArrayError::Memory(_))
    ));

    // A small subset of the same array is admitted.
    let small = array
        .subset(vec![
            Indexer::IntRange {
                start: None,
                end: Some(10),
                step: None,
            },
            Indexer::IntRange {
                start: None,
                end: Some(10),
                step: None,
            },
        ])
        .unwrap();
    assert_eq!(small.shape(), vec![10, 10]);
}

#[test]
fn collections_round_trip_through_manifests() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = ArraySchema::new(
        weather_dimensions(),
        weather_attributes(),
        ElementType::F32,
        None,
    )
    .unwrap();
    client.create_collection("weather", schema.clone(), None).unwrap();

    // A fresh client resolves the same schema from the manifest.
    let reopened = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let collection = reopened.get_collection("weather").unwrap();
    assert_eq!(
        collection.schema().element_type(),
        ElementType::F32
    );
    assert_eq!(collection.schema().shape(), vec![24, 3, 3, 2]);
    assert_eq!(reopened.collections().unwrap().len(), 1);

    assert!(matches!(
        reopened.get_collection("climate"),
        Err(gridstore::client::ClientError::Collection(
            CollectionError::NotFound(_)
        ))
    ));
    assert!(matches!(
        reopened.create_collection("weather", schema, None),
        Err(gridstore::client::ClientError::Collection(
            CollectionError::AlreadyExists(_)
        ))
    ));

    reopened.delete_collection("weather").unwrap();
    assert!(reopened.collections().unwrap().is_empty());
}

#[test]
fn custom_attributes_update_atomically() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = ArraySchema::new(
        vec![DimensionSchema::plain("i", 2)],
        vec![
            AttributeSchema::new("run", AttrKind::Int, true),
            AttributeSchema::new("note", AttrKind::Str, false),
            AttributeSchema::new("issued", AttrKind::Datetime, false),
        ],
        ElementType::I64,
        None,
    )
    .unwrap();
    let collection = client.create_collection("runs", schema, None).unwrap();
    let issued = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    let mut array = collection
        .create_array(
            &[("run".to_string(), AttrValue::Int(1))],
            &[("issued".to_string(), AttrValue::Datetime(issued))],
        )
        .unwrap();

    array
        .update_custom_attributes(&[(
            "note".to_string(),
            AttrValue::Str("reprocessed".to_string()),
        )])
        .unwrap();

    // A datetime custom attribute cannot transition to null, and primary
    // attributes are immutable.
    assert!(array
        .update_custom_attributes(&[("issued".to_string(), AttrValue::Null)])
        .is_err());
    assert!(array
        .update_custom_attributes(&[("run".to_string(), AttrValue::Int(2))])
        .is_err());

    // The record on disk reflects exactly the applied delta.
    let found = collection
        .array_by_id(&array.id())
        .unwrap()
        .unwrap();
    assert_eq!(
        found.custom_attributes(),
        &[
            (
                "note".to_string(),
                AttrValue::Str("reprocessed".to_string())
            ),
            ("issued".to_string(), AttrValue::Datetime(issued)),
        ]
    );
}
