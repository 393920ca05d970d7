pub mod archive;
pub mod binding;
pub mod cleanup;
pub mod commands;
pub mod error;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod lock;
pub mod package;
pub mod registry;
pub mod runtime;
