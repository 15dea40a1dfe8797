pub mod auth;
pub mod client;
pub mod sync;

pub use client::{SheetError, SheetsClient, SheetsConfig};
pub use sync::{ListingsSheet, SheetListing, SyncAction, SyncMode, SyncOutcome, read_listings, upsert};
