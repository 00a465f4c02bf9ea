#![allow(unsafe_code)] // set_var is unsafe in edition 2024; build scripts are single-threaded.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds do not depend on a system install.
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    unsafe {
        std::env::set_var("PROTOC", protoc);
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_prost_build::configure()
        .file_descriptor_set_path(out_dir.join("lodestar_descriptor.bin"))
        .compile_protos(
            &[
                "proto/lodestar/v1/options.proto",
                "proto/lodestar/v1/common.proto",
                "proto/lodestar/v1/resources.proto",
                "proto/lodestar/v1/events.proto",
                "proto/lodestar/v1/executor.proto",
                "proto/lodestar/v1/services.proto",
                "proto/lodestar/engine/v1/engine.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
