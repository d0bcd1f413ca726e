#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod analyse;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod compile;
pub mod error;
pub mod exec;
pub mod hooks;
pub mod logging;
pub mod render;
pub mod repo;
pub mod rt;
