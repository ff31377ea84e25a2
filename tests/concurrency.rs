//! Concurrent access over one storage root.

use std::sync::Barrier;

use gridstore::buffer::TypedBuffer;
use gridstore::client::{Client, ClientOptions};
use gridstore::schema::{AttrKind, AttributeSchema, DimensionSchema, ElementType, VArraySchema};
use gridstore::slicing::IndexExpr;
use gridstore::value::AttrValue;
use gridstore::varray::VArray;

fn file_uri(dir: &tempfile::TempDir) -> String {
    format!("file://{}", dir.path().display())
}

fn two_tile_varray(client: &Client, name: &str) -> VArray {
    let schema = VArraySchema::new(
        vec![DimensionSchema::plain("i", 100)],
        vec![AttributeSchema::new("run", AttrKind::Int, true)],
        ElementType::F64,
        None,
        Some(vec![2]),
        None,
    )
    .unwrap();
    let collection = client.create_collection(name, schema, None).unwrap();
    collection
        .create_varray(&[("run".to_string(), AttrValue::Int(0))], &[])
        .unwrap()
}

#[test]
fn disjoint_tile_writers_proceed_in_parallel() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let varray = two_tile_varray(&client, "grids");

    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        let varray = &varray;
        let barrier = &barrier;
        scope.spawn(move || {
            let subset = varray.subset(0_i64..50).unwrap();
            barrier.wait();
            subset.update(TypedBuffer::F64(vec![1.0; 50])).unwrap();
        });
        scope.spawn(move || {
            let subset = varray.subset(50_i64..100).unwrap();
            barrier.wait();
            subset.update(TypedBuffer::F64(vec![2.0; 50])).unwrap();
        });
    });

    // Both commits are visible.
    let data = varray.subset(IndexExpr::all()).unwrap().read().unwrap();
    let data = data.as_slice::<f64>().unwrap();
    assert!(data[..50].iter().all(|v| *v == 1.0));
    assert!(data[50..].iter().all(|v| *v == 2.0));
}

#[test]
fn overlapping_tile_writers_serialize() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(
        &file_uri(&dir),
        ClientOptions::default().with_write_lock_check_interval(1),
    )
    .unwrap();
    let varray = two_tile_varray(&client, "grids");

    // Both writers cover both tiles; the tile locks serialize them and one
    // of the two buffers wins in full.
    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        for value in [3.0, 4.0] {
            let varray = &varray;
            let barrier = &barrier;
            scope.spawn(move || {
                let subset = varray.subset(IndexExpr::all()).unwrap();
                barrier.wait();
                subset.update(TypedBuffer::F64(vec![value; 100])).unwrap();
            });
        }
    });

    let data = varray.subset(IndexExpr::all()).unwrap().read().unwrap();
    let data = data.as_slice::<f64>().unwrap();
    let first = data[0];
    assert!(first == 3.0 || first == 4.0);
    assert!(data.iter().all(|v| *v == first));
}

#[test]
fn concurrent_readers_share_an_array() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = Client::new(&file_uri(&dir), ClientOptions::default()).unwrap();
    let schema = gridstore::schema::ArraySchema::new(
        vec![DimensionSchema::plain("i", 64)],
        vec![AttributeSchema::new("run", AttrKind::Int, true)],
        ElementType::I64,
        None,
    )
    .unwrap();
    let collection = client.create_collection("runs", schema, None).unwrap();
    let array = collection
        .create_array(&[("run".to_string(), AttrValue::Int(0))], &[])
        .unwrap();
    array
        .subset(IndexExpr::all())
        .unwrap()
        .update(TypedBuffer::I64((0..64).collect()))
        .unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let array = &array;
            scope.spawn(move || {
                let data = array.subset(IndexExpr::all()).unwrap().read().unwrap();
                assert_eq!(data, TypedBuffer::I64((0..64).collect()));
            });
        }
    });
}
