// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure Layer
//!
//! OS and network adapters behind the domain traits.
//!
//! | Module | Purpose |
//! |---|---|
//! | [`named_mutex`] | Cross-process lock in POSIX shared memory |
//! | [`credential_store`] | Line-oriented key/value file shared by all workers |
//! | [`grpc_transport`] | Tonic client for the policy service |

pub mod credential_store;
pub mod grpc_transport;
pub mod named_mutex;

pub use credential_store::CredentialStore;
pub use grpc_transport::GrpcTransport;
pub use named_mutex::{NamedMutex, NamedMutexGuard};
