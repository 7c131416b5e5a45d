//! Per-partition indexes consulted by searches.
//!
//! - `pattern` - in-memory name sets for regex filters
//! - `fulltext` - on-disk tantivy indexes over tokenized names

mod fulltext;
mod pattern;

pub use fulltext::{FullTextIndex, FullTextSearchTask, IndexMode, MAX_HITS};
pub use pattern::{PatternIndex, RegexSearchTask};
