#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the home-health provider geocoding pipeline.
//!
//! This crate contains only data types, key normalization, and pure
//! record-level helpers. It has no I/O and no network dependencies, so
//! every other crate in the workspace can depend on it.

pub mod address;
pub mod policy;
pub mod record;

pub use address::{AddressKey, Location, POSTAL_CODE_WIDTH, RawAddress, normalize_postal_code};
pub use policy::RequestPolicy;
pub use record::{Coordinates, FinalGeocode, GeocodeRecord, SourceRole, dedup_most_complete};
