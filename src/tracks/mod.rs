pub mod archive;
pub mod artifact;
pub mod audit;
pub mod config;
pub mod index;
pub mod metadata;
pub mod paths;
pub mod registry;
pub mod relocate;
pub mod util;
pub mod warn;
pub mod workspace;
