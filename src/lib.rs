pub mod buffer;
pub mod context;
pub mod datamgr;
pub mod error;
pub mod plan;
pub mod process;
pub mod types;
