//! Scenario-based tests for leadflow

#[path = "../helpers.rs"]
mod helpers;

mod binding_resolution;
mod failure_handling;
mod halt_on_failure;
