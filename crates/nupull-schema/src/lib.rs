pub mod framework;
pub mod identity;
pub mod types;

// Re-exports
pub use framework::*;
pub use identity::*;
pub use types::*;
