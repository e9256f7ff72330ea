// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Generates the P4Runtime client and server stubs.

const PROTOS: &[&str] = &["proto/google/rpc/status.proto", "proto/p4/v1/p4runtime.proto"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for proto in PROTOS {
        println!("cargo:rerun-if-changed={proto}");
    }
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    // SAFETY: build scripts are single threaded
    unsafe {
        std::env::set_var("PROTOC", protoc);
    }
    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(PROTOS, &["proto"])?;
    Ok(())
}
