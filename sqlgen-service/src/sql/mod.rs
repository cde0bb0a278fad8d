//! Pure SQL text handling: splitting, classification and row caps.

pub mod classifier;
pub mod limit;
pub mod splitter;

pub use classifier::{classify, Operation};
pub use limit::{apply_row_limit, has_limit_clause, has_returning_clause};
pub use splitter::{
    extract_sql, mask_literals_and_comments, mask_string_literals, split_statements,
    string_literal_spans, strip_leading_comments,
};
