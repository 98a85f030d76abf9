//! Project layout and the GUID-addressed asset index

pub mod database;
pub mod project;

pub use database::{Asset, AssetDatabase};
pub use project::{ProjectFile, ProjectPaths};
