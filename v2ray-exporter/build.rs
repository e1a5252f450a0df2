fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server half is only used by the mock upstream in tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/command.proto"], &["proto/"])?;
    Ok(())
}
