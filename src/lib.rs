pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod encode;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod slurm;
pub mod store;
pub mod viewer;
