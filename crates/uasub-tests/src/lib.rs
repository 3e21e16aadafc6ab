// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasub Integration Tests
//!
//! End-to-end tests for the subscription publishing engine, plus the shared
//! fixtures, mocks and harness they are built on.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Limits, requests and configuration documents
//!   - `mocks`: Recording collaborators
//!   - `harness`: A server with sessions driven like a client would
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p uasub-tests
//! cargo test -p uasub-tests --test integration_publish
//! cargo test -p uasub-tests --test integration_lifecycle
//! cargo test -p uasub-tests --test integration_config
//! ```
//!
//! ## Using the Harness
//!
//! ```rust,ignore
//! use uasub_tests::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_something() {
//!     let server = TestServer::fast();
//!     let session = server.open_session(1);
//!     let id = session.create(RequestFixtures::fast_subscription());
//!     let response = session.next_response(Vec::new()).await;
//!     assert!(response.notification_message.is_keep_alive());
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::init_test_logging;
}
