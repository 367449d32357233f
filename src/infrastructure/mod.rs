//! Infrastructure layer - event publication, execution, logging

pub mod events;
pub mod logging;
pub mod runner;
