//! Common test utilities shared across `trellis-foundation` integration tests.
//!
//! Declared with `mod common;` inside each integration test file that needs it.

pub mod paced_generator;

use trellis_foundation::workflows::Task;

/// `n` tasks named `Task 0`, `Task 1`, ...
pub fn tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task::new(format!("Task {}", i), format!("part {} of the topic", i)))
        .collect()
}
