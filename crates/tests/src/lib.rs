//! Cross-crate integration tests for Recast

#[cfg(test)]
mod mixer_integration;

#[cfg(test)]
mod pipeline_integration;
