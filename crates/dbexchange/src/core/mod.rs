//! Shared leaf types: tagged values, row records, identifier quoting.

pub mod identifier;
pub mod record;
pub mod value;

pub use record::Record;
pub use value::Value;
