//! CLI command handlers. Each command is in its own file for clarity.

mod add;
mod manual;
mod run;
mod send;
mod status;

pub use add::{read_batch, AddArgs};
pub use manual::{print_completions, print_man};
pub use run::run_orchestrator;
pub use send::run_command;
