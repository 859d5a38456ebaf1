//! Infrastructure layer - agent, logging and workflow engine implementations

pub mod agent;
pub mod logging;
pub mod workflow;
