//! Explore the services in a `.proto` file, call them without generated
//! code and keep named test requests per service.

pub mod config;
pub mod error;
pub mod fs;
pub mod invoke;
pub mod sample;
pub mod schema;
pub mod types;

pub use error::{Error, Result};
pub use fs::{FixtureEntry, FixtureStore};
pub use invoke::RpcInvoker;
pub use schema::{Schema, SchemaCatalog};
pub use types::{FixtureFile, FixtureRecord, Metadata, RequestData, TestItem};
