pub mod changeset;
pub mod cli;
pub mod delta;
pub mod error;
pub mod paths;
pub mod profile;
pub mod report;
pub mod stmt;
