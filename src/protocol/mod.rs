pub mod dirty;
pub mod frame;
pub mod pb;
pub mod processor;
pub mod types;
