//! Core modules for docsor's documentation pipeline.
//!
//! Facts and configuration flow into the planner, plans into the executor, and the
//! resulting tree into the validator; the garden loop drives repair between them.

pub mod action;
pub mod agents;
pub mod apply;
pub mod capability;
pub mod corpus;
pub mod doc_spec;
pub mod error;
pub mod facts;
pub mod garden;
pub mod language;
pub mod legacy;
pub mod manifest;
pub mod markdown;
pub mod metadata;
pub mod output;
pub mod paths;
pub mod plan;
pub mod policy;
pub mod quality;
pub mod semantic;
pub mod synthesize;
pub mod time;
pub mod topology;
pub mod trace;
pub mod validate;
pub mod workspace;
