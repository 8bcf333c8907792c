//! AOI inspection server.
//!
//! Library surface for the `aoi-server` binary and its integration tests;
//! see [`handlers::router`] for the HTTP API and [`dispatch`] for the
//! inspection pipeline.

pub mod aggregate;
pub mod barcode;
pub mod barcode_link;
pub mod color;
pub mod compare;
pub mod dispatch;
pub mod engines;
pub mod error;
pub mod golden;
pub mod handlers;
pub mod ocr;
pub mod products;
pub mod sessions;
pub mod shared_folder;
pub mod state;
pub mod vision;
