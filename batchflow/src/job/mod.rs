//! Jobs, flows and the launch surface.
//!
//! A [`Job`] is a [`Flow`] of steps and splits, validated by [`JobBuilder`].
//! Executions are started with [`JobLauncher`] and controlled with
//! [`JobOperator`].

mod builder;
mod flow;
mod flow_job;
mod launcher;
mod operator;
mod validator;

#[cfg(test)]
mod integration_tests;

pub use builder::JobBuilder;
pub use flow::{Flow, FlowBuilder, FlowNode, Transition, TransitionTarget};
pub use flow_job::Job;
pub use launcher::JobLauncher;
pub use operator::JobOperator;
pub use validator::{DefaultJobParametersValidator, JobParametersValidator};
