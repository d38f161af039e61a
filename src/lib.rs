//! # Dimensions Records
//!
//! Lazily resolved records over the Dimensions search API.
//!
//! Search results arrive as partial JSON. Each result becomes a [`Record`]
//! whose fields are filled in on first read: simple fields straight from the
//! payload, nested fields by expanding it once, and anything still missing by
//! a single follow-up search. Within a [`Session`] every identifier maps to
//! exactly one record instance.
//!
//! ## Architecture
//!
//! - [`models`]: entity schemas, [`Record`] and query parsing
//! - [`session`]: authentication, identity cache, fill searches and paging
//! - [`transport`]: HTTP, on-disk caching and mock transports
//! - [`config`]: configuration management
//! - [`utils`]: retry helper
//!
//! ```no_run
//! use dimensions_records::{Config, Session};
//!
//! # fn main() -> dimensions_records::Result<()> {
//! let session = Session::from_config(&Config::default())?;
//! for record in session.query(r#"search publications for "SBML" return researchers"#)? {
//!     let researcher = record?;
//!     println!("{} {}", researcher.get_text("last_name")?, researcher.get_text("orcid")?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use crate::config::Config;
pub use error::{DimensionsError, Result};
pub use models::{EntityKind, FieldStatus, FieldValue, MergePolicy, Record, RecordRef, ResultKind};
pub use session::{CacheStats, QueryResults, Session};
pub use transport::{Classification, Transport, TransportResponse};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
