pub mod archive;
pub mod import;
pub mod migrations;
pub mod schema;
