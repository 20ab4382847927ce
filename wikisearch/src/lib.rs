//! Wiki Search Core - hybrid search and prefetch for the wiki reader app
//!
//! Online queries go to the wiki's search API; saved pages are searched
//! locally by title (SQLite) and body (Tantivy). A connectivity gate picks
//! which stream the screen shows, and the top online result is prefetched.
//!
//! Types are exported via UniFFI proc-macros (#[derive(uniffi::Record/Enum)]).

pub mod config;
pub mod connectivity;
pub mod database;
pub mod indexer;
pub mod interface;
pub mod local;
pub mod merge;
pub mod models;
pub mod paging;
pub mod prefetch;
pub mod query;
pub mod remote;
mod session;
pub mod sources;

pub use config::SearchConfig;
pub use interface::*;
pub use models::SavedPage;
pub use session::{SearchSession, Sources};

uniffi::setup_scaffolding!("wikisearch");
