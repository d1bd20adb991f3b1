pub mod cancel;
pub mod config;
pub mod git;
pub mod git_sync;
pub mod lockfile;
pub mod model;
pub mod observer;
pub mod paths;
pub mod provider;
pub mod retry;
pub mod summary;
pub mod sync_engine;
mod sync_engine_apply;
pub mod sync_engine_types;
mod sync_engine_work_items;
mod sync_engine_workers;
