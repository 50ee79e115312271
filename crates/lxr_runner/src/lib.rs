//! # lxr_runner
//!
//! Host tool execution wrapper for lxc-runner.
//!
//! This crate is the only place that talks to the Proxmox command line
//! tools. Everything above it works against the [`HostTools`] trait.
//!
//! # Features
//!
//! - **CLI Tools**: `pct` and `pveam` invoked as child processes ([`PveCli`])
//! - **Deadlines**: every invocation carries a configurable timeout
//! - **Structured Errors**: command, exit code and stderr in one [`ToolError`]
//! - **Listing Parsers**: typed records for `pct list` and `pveam` tables
//! - **Mock Host**: in-memory registry for tests ([`MockHost`])
//!
//! # Example
//!
//! ```rust,no_run
//! use lxr_runner::{HostTools, PveCli, PveCliOptions, ToolPaths};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tools = PveCli::new(ToolPaths::resolve()?, PveCliOptions::default());
//!
//!     let table = tools.list().await?;
//!     for record in lxr_runner::parse_container_list(&table)? {
//!         println!("{} {} {}", record.id, record.status, record.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod host;
pub mod listing;
pub mod mock;

pub use cli::{find_tool, render_command, run_tool, LogStream, PveCli, PveCliOptions, ToolPaths};
pub use error::{ToolError, ToolResult};
pub use host::{HostTools, PushOptions, ToolOutput};
pub use listing::{
    parse_catalog, parse_container_list, parse_image_list, parse_status, CatalogEntry,
    ContainerRecord, ContainerStatus, LocalImage,
};
pub use mock::{CapturedCall, MockContainer, MockHost, PushedFile};
