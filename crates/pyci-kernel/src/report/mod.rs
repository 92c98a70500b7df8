//! Test reports
//!
//! - `junit.rs`: JUnit XML model, rendering and writing.

pub mod junit;

pub use junit::{JUnitReport, TestCase, TestFailure, TestSuite};
