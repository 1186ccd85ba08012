// Build script to compile the ioc.Database protobuf definitions.
//
// Generates message structs plus server and client stubs, and writes a file
// descriptor set used by the gRPC reflection service. protoc comes from
// protoc-bin-vendored so no system install is needed.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    // Well-known types (empty.proto, timestamp.proto)
    let include = protoc_bin_vendored::include_path()?;

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("ioc_descriptor.bin"))
        .compile_protos(&["proto/ioc.proto"], &[PathBuf::from("proto"), include])?;

    println!("cargo:rerun-if-changed=proto/ioc.proto");
    Ok(())
}
