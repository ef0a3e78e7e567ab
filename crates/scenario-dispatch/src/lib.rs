// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concrete implementations of `scenario_core::dispatcher::Dispatcher`.
//! `scenario-core` owns the trait and request/response types (the
//! consumer side); this crate supplies the bodies that actually move
//! bytes over the network (or, for tests, fake moving them).

pub mod reqwest_dispatcher;
pub mod stub;

pub use reqwest_dispatcher::ReqwestDispatcher;
pub use stub::{ScriptedResponse, StubDispatcher};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
