//! Core types for the template-sync engine.
//!
//! This crate provides the foundational, database-free types shared by the
//! backends and the engine:
//!
//! - [`Link`], [`CvEntry`], [`CvChain`] - identifier chains
//! - [`DataType`] - the column type vocabulary
//! - [`Value`], [`Row`] - cells and flattened rows
//! - [`ChainType`] - the resolver for structured chain shapes
//! - [`TemplateSide`], [`BackendArgs`] - validated per-side arguments
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── sync-sql            (connection contract, query builder, backend trait)
//!    │      ├─── mysql-connection / sqlite-connection
//!    │      ├─── generic-backend
//!    │      └─── structured-backend
//!    │
//!    └─── template-sync       (differ, dispatcher, orchestrator, report, CLI)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{ChainType, CvChain, CvEntry, DataType, Link, NodeId};
//!
//! let key = CvChain::new(vec![CvEntry::new(
//!     Link::Node { bundle: "server".into(), id: NodeId::ByTitle },
//!     DataType::String,
//! )]);
//! let value = CvChain::new(vec![CvEntry::new(
//!     Link::Field { name: "field_ram".into() },
//!     DataType::Decimal,
//! )]);
//! assert_eq!(ChainType::resolve(&key, &value), Ok(ChainType::NodeToFields));
//! ```

pub mod chain;
pub mod chain_type;
pub mod side;
pub mod types;
pub mod values;

pub use chain::{CollectionId, CvChain, CvEntry, Link, NodeId};
pub use chain_type::{ensure_columns, ChainError, ChainType};
pub use side::{BackendArgs, GenericArgs, SideOptions, StructuredArgs, TemplateSide};
pub use types::DataType;
pub use values::{join_values, Row, Value, ValueError};
