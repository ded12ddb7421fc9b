//! Cross-component tests driving the full calibration pipeline.

mod integration_tests;
