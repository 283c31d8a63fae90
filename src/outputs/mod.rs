//! Corpus persistence.
//!
//! # Submodules
//!
//! - [`checkpoint`]: reads the corpus document and rewrites it atomically
//! - [`discovery`]: finds the latest prior output of a pass and names new ones
//!
//! # Output Structure
//!
//! ```text
//! output/
//! ├── api_start_date_updated_2025-07-03T17-19-55-691Z.json
//! ├── html_start_date_updated_2025-07-04T09-00-12-004Z.json
//! └── html_verified_2025-07-05T01-30-00-120Z.json
//! ```
//!
//! Every file is a complete corpus document, pretty-printed with two-space
//! indentation so successive checkpoints diff cleanly.

pub mod checkpoint;
pub mod discovery;
