pub mod records;
pub mod store;

// Re-export important types
pub use records::*;
pub use store::*;
