//! Browser automation agent that perceives pages as compact, semantically
//! grouped text instead of screenshots.

pub mod actions;
pub mod agent;
pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod hands;
pub mod operator;
pub mod safety;
pub mod session;
pub mod types;
