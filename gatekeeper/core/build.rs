// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Build Script for gatekeeper-core
//!
//! Compiles the Protocol Buffer definitions of the remote policy service.
//!
//! # Compilation Targets
//!
//! - `../../proto/appguard.proto` - decision RPCs and the control stream service
//! - `../../proto/commands.proto` - control stream messages and `FirewallPolicy`
//!
//! Generated code is placed in `OUT_DIR` and included via `tonic::include_proto!`
//! in `src/proto.rs`.
//!
//! # Dependencies
//!
//! - **protoc**: Protocol buffer compiler (vendored via `protoc-bin-vendored`)
//! - **tonic-prost-build**: Code generator for Rust gRPC stubs
//!
//! The server side is generated as well so integration tests can stand up an
//! in-process policy service.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    let protos = ["../../proto/appguard.proto", "../../proto/commands.proto"];

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &["../../proto"])?;

    for proto in protos {
        println!("cargo:rerun-if-changed={proto}");
    }

    Ok(())
}
