//! Engine tests, organized by the submodule they exercise.

mod executor;
