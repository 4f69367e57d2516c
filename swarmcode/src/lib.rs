//! swarmcode - coding agents that run alone or as a coordinated batch
//!
//! - [`ai::run_agent_loop`] drives one agent: model turn, tool dispatch, repeat
//! - [`ai::multi_agent::MultiAgentExecutor`] runs many agents over one workspace
//!   with file-conflict tracking
//! - [`tools`] holds the tool registry, permission gates and built-in coding tools

pub mod ai;
pub mod config;
pub mod tools;
