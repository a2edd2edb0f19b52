fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["proto/cloudevents.proto", "proto/maestro.proto"],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/cloudevents.proto");
    println!("cargo:rerun-if-changed=proto/maestro.proto");

    Ok(())
}
