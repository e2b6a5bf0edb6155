//! A Rust client for the EODMS REST API (RAPI), the Earth observation
//! catalog of Natural Resources Canada.
//!
//! The flow mirrors the web portal: search a collection, order the images
//! you want, then wait for the order items to become available and
//! download them.
//!
//! ## Quick start
//! - Configure credentials via environment variables (`EODMS_USER`, `EODMS_PASSWORD`) or an
//!   `.eodmsrc` file (supported in the current directory and in your home directory).
//! - Build a [`SearchRequest`], pass the results to [`Client::order`], then to
//!   [`Client::download`].
//!
//! ```no_run
//! use anyhow::Result;
//! use eodms_rapi::{Client, DateRange, DownloadOptions, Filter, OrderOptions, SearchRequest};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let req = SearchRequest::new("RCM")
//!         .filter(Filter::new("Beam Mnemonic", "=", ["16M11", "16M13"]))
//!         .dates(DateRange::since_phrase("3 days")?)
//!         .max_results(2);
//!     let records = client.search(&req)?;
//!     let items = client.order(&records, &OrderOptions::default())?;
//!     client.download(&items, std::path::Path::new("downloads"), &DownloadOptions::default())?;
//!     Ok(())
//! }
//! ```
//!
//! Errors are `anyhow` errors; the ones raised by the RAPI itself carry a
//! [`RapiError`] that can be recovered with `downcast_ref`.

#![forbid(unsafe_code)]

mod client;
mod collections;
mod config;
mod convention;
mod dates;
mod destination;
mod download;
mod error;
mod geo;
mod order;
mod query;
mod results;
mod search;
mod util;

pub use client::{Client, ClientConfig, DEFAULT_RAPI_ROOT, RemoteFile};
pub use collections::{Choice, CollectionFields, CollectionSummary, FieldChoices, FieldInfo};
pub use convention::FieldConvention;
pub use dates::{DateRange, RAPI_FORMAT};
pub use destination::{Destination, FtpDestination, PhysicalDestination};
pub use download::{DownloadOptions, DownloadPath, DownloadedItem};
pub use error::{QueryError, RapiError};
pub use geo::{GeometrySource, geometry_to_wkt, image_footprint_wkt, is_wkt, to_feature_collection};
pub use order::{
    AVAILABLE_FOR_DOWNLOAD, FAILED_STATUSES, ItemDestination, OrderItem, OrderOptions, OrderQuery,
    Priority, find_item_in_orders, remove_duplicate_orders,
};
pub use query::{Filter, QuerySpec, SpatialFilter};
pub use results::{Record, ResultFormat, parse_metadata, rekey};
pub use search::SearchRequest;
