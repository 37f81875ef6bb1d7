//! Forward modelling and data pipeline tools for concrete experiments.
//!
//! The finite element model of a three point bending test, unit aware
//! derived-quantity calculators, posterior predictive propagation and the
//! Young's modulus data workflow with its lab system clients.

pub mod calculators;
pub mod config;
pub mod datatypes;
pub mod error;
pub mod forward;
pub mod lab;
pub mod mesher;
pub mod post_processor;
pub mod propagation;
pub mod solver;
pub mod stats;
pub mod units;
pub mod workflow;

pub use error::{CemflowError, Result};
