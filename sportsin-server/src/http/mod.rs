/// Handler error type.
pub mod error;
/// RFC 7807 problem documents.
pub mod problem;
