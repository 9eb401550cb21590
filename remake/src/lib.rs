//! A build system that bridges the gap between make and redo.
//!
//! As with make, builds are driven by a central rule file (`Remakefile` by default) holding
//! rules with targets, prerequisites and a shell script. As with redo, scripts may request
//! further targets while they run by invoking `remake dependency...`; those dynamic
//! dependencies are rebuilt when obsolete and remembered across runs in the `.remake` database,
//! where they participate in obsoleteness checking like static prerequisites.
//!
//! A single executable plays two roles. The long-lived server owns the whole build: it loads
//! the database and the rules, schedules jobs under the parallelism cap, and listens on a
//! per-build local socket. Short-lived clients are spawned by build scripts; they post the
//! targets they need over the socket and block until the server reports success or failure.

pub mod ipc;
pub mod parse;
pub mod path;
pub mod process;
pub mod rule;
pub mod script;
pub mod server;
pub mod status;
pub mod store;
pub mod tracker;

pub use path::BuildDir;
pub use rule::{Override, Rule, RuleSet};
pub use server::{Options, Server};
pub use status::{State, StatusRecord};
pub use store::{DepStore, Group};
