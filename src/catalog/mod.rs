pub mod client;
pub mod memory;

pub use client::CatalogSource;
pub use memory::StaticCatalog;
