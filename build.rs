use tonic_build::manual::{Builder, Method, Service};

fn prost_method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::grpc::proto::{input}"))
        .output_type(format!("crate::grpc::proto::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Messages are declared with prost derives in src/grpc/proto.rs, so only
    // the service glue is generated here and no protoc install is required.
    let raft_service = Service::builder()
        .name("RaftService")
        .package("raft")
        .method(prost_method(
            "request_vote",
            "RequestVote",
            "VoteRequest",
            "VoteResponse",
        ))
        .method(prost_method(
            "append_entries",
            "AppendEntries",
            "AppendEntriesRequest",
            "AppendEntriesResponse",
        ))
        .build();

    let client_service = Service::builder()
        .name("ClientService")
        .package("raft")
        .method(prost_method(
            "submit",
            "Submit",
            "SubmitRequest",
            "SubmitResponse",
        ))
        .method(prost_method(
            "status",
            "Status",
            "StatusRequest",
            "StatusResponse",
        ))
        .build();

    Builder::new().compile(&[raft_service, client_service]);
}
