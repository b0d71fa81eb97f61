pub mod cache;
pub mod columns;
pub mod derived;
pub mod period;
pub mod pretty;
pub mod request;
pub mod segment;
pub mod summary;
pub mod table;
