// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parking-lock gateway.
//!
//! Field-deployed parking-lock devices hold a persistent TCP session to
//! this gateway, speaking a length-prefixed, CRC-checked binary framing.
//! The gateway authenticates each session by the device's 8-byte serial
//! number, tracks last-known state, relays operator commands received over
//! a JSON HTTP API, and fans every parsed heartbeat out to an external
//! webhook with a shared-secret header.
//!
//! Module map:
//! - [`protocol`] - framing codec, heartbeat decode, stream reframing
//! - [`server`] - listener, sessions, registry, dispatcher, webhook sink
//! - [`api`] - operator HTTP facade
//! - [`config`] - configuration loading and validation

pub mod api;
pub mod config;
pub mod protocol;
pub mod server;

pub use config::GatewayConfig;
pub use server::{
    CommandDispatcher, DeviceRegistry, DispatchError, LockServer, LockState, ServerError,
    StatusUpdate, WebhookSink,
};
