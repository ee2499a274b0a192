//! CLI command implementations

pub mod db;
pub mod list;
pub mod logs;
pub mod pr;
pub mod serve;
pub mod start;
pub mod status;
pub mod sync;
pub mod tui;

pub use list::ListArgs;
pub use logs::LogsArgs;
pub use pr::{PrAction, PrArgs};
pub use serve::ServeArgs;
pub use start::StartArgs;
