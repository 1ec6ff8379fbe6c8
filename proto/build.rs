//! Build script for compiling the hub and agent protobuf definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_files = ["proto/gpctl.proto"];
    let includes = ["proto"];

    // Use the vendored protoc unless the environment already provides one
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&proto_files, &includes)?;

    for file in &proto_files {
        println!("cargo:rerun-if-changed={file}");
    }

    Ok(())
}
