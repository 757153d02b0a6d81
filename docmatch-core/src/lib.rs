// docmatch-core/src/lib.rs
// Pure Rust API: query matching, expression evaluation, aggregation pipelines

pub mod aggregation;
pub mod document;
pub mod error;
pub mod expression;
pub mod options;
pub mod query;
pub mod value;
pub mod value_utils;

// Public exports
pub use aggregation::{run, run_with_options, Pipeline, Stage};
pub use document::Document;
pub use error::{DocMatchError, Result};
pub use expression::{evaluate, evaluate_on, Scope};
pub use options::{find, find_with, AggregateOptions, ErrorPolicy, FindOptions};
pub use query::{matches, matches_with, MatchContext, Query, TextSearch};
pub use value::{compare_values, values_equal, Value};
