pub mod app;
pub mod blob;
pub mod completion;
pub mod config;
pub mod domain;
pub mod error;
pub mod fields;
pub mod lineage;
pub mod manifest;
pub mod metadata;
pub mod output;
pub mod plan;
pub mod poller;
pub mod resolver;
pub mod staging;
pub mod store;
pub mod workflow;
