pub mod config;
pub mod layout;
pub mod sources;
pub mod toolchain;
