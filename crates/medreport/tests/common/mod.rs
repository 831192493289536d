//! Shared test utilities for medreport integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a pipeline to scripted collaborators and an in-memory store
//! - Scripted generator and mailer fakes
//! - Builders for patient records

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestHarness;
