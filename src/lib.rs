// Trellis - a declarative dependency-injection container for Rust
//
// This library provides named component definitions with inheritance,
// constructor and setter autowiring, and ordered lifecycle management.

// Re-export core functionality
pub use trellis_core::*;
