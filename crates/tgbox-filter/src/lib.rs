//! tgbox-filter: turns `key=value` tokens into a [`SearchFilter`] and
//! evaluates it against Box records.
//!
//! ```text
//! file_name=report +e file_name=report_draft min_size=1MB
//! ```
//! Mode starts as include; `+i`/`++include` and `+e`/`++exclude` switch it.
//! A record matches when every populated include field has at least one
//! matching value and no exclude field matches.

pub mod compiler;
pub mod filter;
pub mod matcher;
pub mod units;

pub use compiler::{compile, FilterError};
pub use filter::{CAttrValue, CAttrsPattern, FilterSet, SearchFilter, TextPattern};
pub use matcher::in_scope;
pub use units::{parse_size, parse_time};
