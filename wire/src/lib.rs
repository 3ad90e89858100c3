//! Wire protocol: messages, the `where`-clause AST, include trees, and
//! query-key hashing (§6 External interfaces, §4.2.9).

mod error;
mod include;
mod message;
mod query;
mod where_clause;

pub use error::WireError;
pub use include::{flat_include_resources, Include, IncludeTree};
pub use message::{parse_message, ErrorBody, ErrorCode, Message, Procedure};
pub use query::{query_key, Query, QueryKey, SortDirection, SortKey};
pub use where_clause::{FieldMatch, WhereClause};
