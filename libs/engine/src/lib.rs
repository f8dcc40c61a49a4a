//! Session and geofence tracking engine
//!
//! This crate holds the rules of field tracking: one active session per
//! employee, ordered and deduplicated position samples, cumulative GPS
//! distance, at-most-once geofence entry per assignment, a rate-limited path
//! log, and daily summaries derived on demand. Storage is abstracted behind
//! [`store::TrackingStore`]; the crate ships an in-memory implementation.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use engine::{EngineConfig, MemoryStore, SystemClock, Tracker};
//!
//! # async fn demo() -> engine::EngineResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let employee = store.add_employee("Asha", "FT-001", None);
//! let tracker = Tracker::new(store, Arc::new(SystemClock), EngineConfig::default());
//!
//! let session = tracker
//!     .check_in(employee.id, 17.452, 78.3974, Default::default())
//!     .await?;
//! let outcome = tracker
//!     .update_location(session.id, 17.453, 78.3974, None)
//!     .await?;
//! println!("accepted: {}", outcome.accepted);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod ingest;
pub mod model;
pub mod polyline;
pub mod retry;
pub mod session;
pub mod store;
pub mod summary;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, EngineResult, ErrorKind, StoreError};
pub use geo::{Circle, Position};
pub use ingest::UpdateOutcome;
pub use store::{MemoryStore, TrackingStore};
pub use summary::Period;
pub use tracker::{EngineConfig, Tracker};
