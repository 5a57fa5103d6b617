//! template-sync library
//!
//! Finds and optionally repairs differences between two relational
//! databases, driven by declarative mapping templates.
//!
//! # Features
//!
//! - Generic backend: flat tables addressed by columns
//! - Structured backend: nodes, typed relations and field-collection items
//!   with their field tables and revisions
//! - Single- and multi-valued templates with key or key+value matching
//! - Per-column writes with partial-success reporting
//! - Reverse and bidirectional runs, key and template filters
//! - Row transforms and change callbacks, built-in or registered by name
//!
//! # Embedding
//!
//! ```rust,no_run
//! use template_sync::{connect, LogReporter, Registry, Reporter, Runner, SyncConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SyncConfig::load("sync.yaml".as_ref())?.validate(&Registry::default())?;
//! let runner = Runner::new(&config);
//! let mut source = connect(&runner.source().config.url).await?;
//! let mut destination = connect(&runner.destination().config.url).await?;
//! let reporters: Vec<Box<dyn Reporter>> = vec![Box::new(LogReporter)];
//! let summary = runner
//!     .run(source.as_mut(), destination.as_mut(), &reporters)
//!     .await?;
//! println!("{} changes", summary.changes);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod connect;
pub mod context;
pub mod differ;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod registry;
pub mod report;
pub mod run;
pub mod transform;

pub use callback::{CallbackEvent, ChangeCallback, Stage};
pub use config::{Action, ConfigError, SyncConfig, ValidatedConfig};
pub use connect::connect;
pub use differ::{DiffOutcome, Differ};
pub use dispatch::{Dispatcher, SyncMode};
pub use error::{ExitCode, SyncError};
pub use registry::Registry;
pub use report::{
    ChangeOutcome, DiffRecord, DiffReport, FileReporter, LogReporter, Presence, Reporter,
};
pub use run::{RunSummary, Runner};
pub use transform::{RowTransform, TransformError};
