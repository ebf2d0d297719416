// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the gatekeeper CLI

pub mod check;
pub mod config;
pub mod credentials;

pub use self::check::CheckArgs;
pub use self::config::ConfigCommand;
pub use self::credentials::CredentialsCommand;
