//! Domain Layer
//!
//! The core of Ferry - release logic without I/O dependencies.
//!
//! ## Structure
//!
//! - `entities/` - Release objects, manifest, deploy state
//! - `value_objects/` - Resource types, object identity, reference values
//! - `services/` - Lookup tables, reference replacement, overrides, merge, diff
//! - `ports/` - Interface definitions for infrastructure
//!
//! ## Design Principles
//!
//! 1. **No I/O** - This layer never touches the file system or network directly
//! 2. **Pure Functions** - Services are stateless and testable
//! 3. **Ports & Adapters** - All I/O goes through trait-defined ports

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;
