//! Integration Tests Module
//!
//! Whole-pipeline tests against scripted fakes of the query engine and the
//! language model. No network access.

// Scripted engine / provider and pipeline assembly
mod support;

// Acceptance questions, retries, unsafe model output, failures
mod scenarios_test;

// proptest invariants of the guard and the synthesizer
mod properties_test;
