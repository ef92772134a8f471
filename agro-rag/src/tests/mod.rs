//! Integration tests for the retrieval core.
//!
//! These run the whole pipeline over PDFs generated on the fly, with mock
//! embedding and generation services standing in for the remote API.

pub mod support;

mod engine_integration;
