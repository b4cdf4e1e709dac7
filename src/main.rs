use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use raft_lite::config::{NodeConfig, PeerConfig};
use raft_lite::grpc::proto::client_service_client::ClientServiceClient;
use raft_lite::grpc::proto::{StatusRequest, SubmitRequest};
use raft_lite::grpc::{GrpcServer, GrpcTransport};
use raft_lite::raft::{FilePersister, MemoryPersister, Persister, RaftNode};
use raft_lite::shutdown::cancel_on_signal;

#[derive(Parser, Debug)]
#[command(name = "raft-lite")]
#[command(version)]
#[command(about = "A Raft consensus node with leader election and log replication")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a raft-lite server node
    Server(ServerArgs),

    /// Submit a command to the replicated log
    Submit {
        #[command(flatten)]
        client: ClientArgs,

        /// The command to replicate (sent as UTF-8 bytes)
        command: String,
    },

    /// Show a node's role, term and log positions
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node ID (unique identifier for this node)
    #[arg(long, default_value = "1")]
    node_id: u64,

    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Peer addresses (comma-separated, format: "id:host:port")
    /// Example: "2:127.0.0.1:50052,3:127.0.0.1:50053"
    #[arg(long, default_value = "")]
    peers: String,

    /// Directory for term, vote and log. Without it state is kept in memory only.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Base election timeout in milliseconds
    #[arg(long, default_value = "650")]
    election_timeout_ms: u64,

    /// Upper bound of the random jitter added to the election timeout
    #[arg(long, default_value = "150")]
    election_jitter_ms: u64,

    /// Leader heartbeat interval in milliseconds
    #[arg(long, default_value = "100")]
    heartbeat_ms: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct SubmitOutput {
    accepted: bool,
    index: u64,
    term: u64,
    leader_id: Option<u64>,
}

#[derive(Serialize)]
struct StatusOutput {
    node_id: u64,
    role: String,
    term: u64,
    leader_id: Option<u64>,
    commit_index: u64,
    last_applied: u64,
    last_log_index: u64,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = NodeConfig {
        node_id: args.node_id,
        listen_addr,
        peers: PeerConfig::parse_list(&args.peers)?,
        election_timeout_base_ms: args.election_timeout_ms,
        election_timeout_jitter_ms: args.election_jitter_ms,
        heartbeat_interval_ms: args.heartbeat_ms,
        data_dir: args.data_dir,
        ..NodeConfig::default()
    };
    config.validate()?;

    tracing::info!(
        node_id = config.node_id,
        listen_addr = %config.listen_addr,
        data_dir = ?config.data_dir,
        peers = ?config.peers.iter().map(|p| format!("{}:{}", p.node_id, p.addr)).collect::<Vec<_>>(),
        "Starting raft-lite node"
    );

    let persister: Arc<dyn Persister> = match &config.data_dir {
        Some(dir) => Arc::new(FilePersister::new(dir)?),
        None => Arc::new(MemoryPersister::new()),
    };
    let transport = Arc::new(GrpcTransport::new(&config.peers)?);

    let (node, mut apply_rx) = RaftNode::new(config.clone(), transport, persister)?;
    let node = Arc::new(node);

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone())?;

    let raft_handle = tokio::spawn(node.clone().run());

    // The state machine of this binary just records what was committed.
    tokio::spawn(async move {
        while let Some(msg) = apply_rx.recv().await {
            tracing::info!(
                index = msg.command_index,
                command = %String::from_utf8_lossy(&msg.command),
                "Applied command"
            );
        }
    });

    let server = GrpcServer::new(config.listen_addr, node.clone());
    let result = server.run(shutdown.clone()).await;

    node.shutdown();
    let _ = raft_handle.await;
    result?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_submit(
    client: &mut ClientServiceClient<tonic::transport::Channel>,
    command: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .submit(SubmitRequest {
            command: command.into_bytes(),
        })
        .await?
        .into_inner();

    match output_format {
        OutputFormat::Json => {
            let output = SubmitOutput {
                accepted: response.is_leader,
                index: response.index,
                term: response.term,
                leader_id: response.leader_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if response.is_leader {
                println!("Command accepted");
                println!("Index: {}", response.index);
                println!("Term:  {}", response.term);
            } else {
                match response.leader_id {
                    Some(id) => println!("Not the leader. Retry against node {}", id),
                    None => println!("Not the leader. Leader unknown, retry later"),
                }
            }
        }
    }
    Ok(())
}

async fn handle_status(
    client: &mut ClientServiceClient<tonic::transport::Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client.status(StatusRequest {}).await?.into_inner();

    match output_format {
        OutputFormat::Json => {
            let output = StatusOutput {
                node_id: response.node_id,
                role: response.role,
                term: response.term,
                leader_id: response.leader_id,
                commit_index: response.commit_index,
                last_applied: response.last_applied,
                last_log_index: response.last_log_index,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Node Status");
            println!("{}", "=".repeat(30));
            println!("Node:         {}", response.node_id);
            println!("Role:         {}", response.role);
            println!("Term:         {}", response.term);
            match response.leader_id {
                Some(id) => println!("Leader:       node {}", id),
                None => println!("Leader:       unknown"),
            }
            println!("Commit index: {}", response.commit_index);
            println!("Last applied: {}", response.last_applied);
            println!("Last log:     {}", response.last_log_index);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Submit { client, command } => {
            let mut grpc_client = ClientServiceClient::connect(client.addr.clone()).await?;
            handle_submit(&mut grpc_client, command, &client.output).await?;
        }
        Commands::Status { client } => {
            let mut grpc_client = ClientServiceClient::connect(client.addr.clone()).await?;
            handle_status(&mut grpc_client, &client.output).await?;
        }
    }

    Ok(())
}
