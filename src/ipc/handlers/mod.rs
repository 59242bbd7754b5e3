pub mod allocation;
pub mod core;
