//! Test module for jet-peer
//!
//! This module contains tests for:
//! - Outbound request shapes and local precondition checks
//! - Inbound dispatch: responses, fetch notifications, set/call invocations
//! - Response timeouts and single delivery
//! - Teardown on close and connection handling

mod dispatch_tests;
