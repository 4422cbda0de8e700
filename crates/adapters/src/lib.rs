pub mod export;
pub mod memory;
pub mod mysql;
