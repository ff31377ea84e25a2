//! A storage engine for N-dimensional dense numeric arrays.
//!
//! `gridstore` stores typed N-dimensional arrays inside named *collections*
//! under a common storage root. A collection is created from a schema
//! describing dimensions, attributes, the element type and an optional fill
//! value. Arrays are located by id or by their primary attribute values,
//! sliced lazily with *fancy indexers* (integers, scale values, labels,
//! datetimes) and read, updated or cleared through [`array::Subset`] handles.
//!
//! *Virtual arrays* ([`varray::VArray`]) are logical arrays whose data is
//! physically split into a regular grid of per-tile files. Subset operations
//! on a virtual array are planned onto the affected tiles and executed on a
//! bounded worker pool, with per-tile write locks so that disjoint writers
//! proceed in parallel.
//!
//! The engine is safe under concurrent access by multiple threads and
//! multiple processes sharing the same storage root: every array, tile and
//! collection is guarded by a two-layer readers-writer lock (an in-process
//! registry plus on-disk advisory artifacts, see [`locks`]).
//!
//! The best places to start are [`client::Client`] and
//! [`collection::Collection`].
//!
//! ## Example
//! ```no_run
//! use gridstore::client::{Client, ClientOptions};
//! use gridstore::schema::{ArraySchema, DimensionSchema, ElementType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("file:///var/lib/gridstore", ClientOptions::default())?;
//! let schema = ArraySchema::new(
//!     vec![
//!         DimensionSchema::plain("y", 720),
//!         DimensionSchema::plain("x", 1440),
//!     ],
//!     vec![],
//!     ElementType::F64,
//!     None,
//! )?;
//! let collection = client.create_collection("grids", schema, None)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]

pub mod array;
pub mod buffer;
pub mod client;
pub mod collection;
pub mod config;
pub mod locks;
pub mod memory;
pub mod paths;
pub mod schema;
pub mod slicing;
pub mod storage;
pub mod uri;
pub mod value;
pub mod varray;

/// Re-export [`chrono`].
pub use chrono;

/// Re-export [`half`].
pub use half;

/// Re-export [`num`].
pub use num;

/// Re-export [`serde_json`].
pub use serde_json;

/// Re-export [`uuid`].
pub use uuid;

/// The version of the metadata and manifest records written by this crate.
pub const SCHEMA_VERSION: u32 = 1;
