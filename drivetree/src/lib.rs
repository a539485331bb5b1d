pub mod config;
pub mod directory;
pub mod logging;
pub mod model;
pub mod replay;
pub mod tree;
