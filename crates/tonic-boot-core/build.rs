/// Generates the gRPC client and server bindings for `proto/greeter.proto`.
///
/// The output lands in `OUT_DIR` and is pulled in with
/// `tonic::include_proto!("greeter")`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/greeter.proto");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/greeter.proto"], &["proto"])?;
    Ok(())
}
