//! Downstream workflow trigger
//!
//! - [`WorkflowTrigger`] trait invoked once per fire
//! - [`HttpWorkflowTrigger`] creating the destination evaluation workflow over HTTP

mod http;
mod workflow;

pub use http::HttpWorkflowTrigger;
pub use workflow::{TriggerError, WorkflowTrigger};
