//! Construction Phase
//!
//! All task validation happens here, producing a `ValidatedTask`.
//!
//! # Two-Phase Architecture
//!
//! 1. **Construction Phase** (this module):
//!    - Collect step descriptors
//!    - Expand the venv provisioning step
//!    - Reject malformed tasks
//!    - Produce `ValidatedTask`
//!
//! 2. **Execution Phase** (executor module):
//!    - Run steps in order
//!    - Apply failure policies
//!    - Run the post action

pub mod builder;

pub use builder::TaskBuilder;
