//! CLI commands. Each one builds a lifecycle from [`Config`] and prints
//! what happened; the work itself lives in [`crate::lifecycle`].

mod collisions;
mod config;
mod import;
mod install;
mod list;
mod paths;
mod setup;
mod uninstall;

pub use collisions::collisions;
pub use config::{CliLifecycle, Config, INDEX_URL_ENV, lock_policy};
pub use import::import;
pub use install::install;
pub use list::list;
pub use paths::{
    ROOT_ENV, default_root, lock_root, namespace_root, package_root, resolve_root,
};
pub use setup::setup;
pub use uninstall::uninstall;
