fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protobuf_src::protoc());
    tonic_build::configure().compile(
        &[
            "proto/consensus.proto",
            "proto/query.proto",
            "proto/relay.proto",
        ],
        &["proto"],
    )?;
    Ok(())
}
