#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use mcp_ssh::mcp::McpSshCommands;
use mcp_ssh::mcp::config::resolve_port;
use mcp_ssh::mcp::logging::init_logging;
use mcp_ssh::mcp::service::SshService;
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let logging = init_logging();
    let args: Vec<String> = std::env::args().collect();
    let service = Arc::new(SshService::bootstrap(&args, &logging)?);

    // Setup MCP server
    let mcp_addr = format!("0.0.0.0:{}", resolve_port(None));
    info!("Starting MCP server on {}", mcp_addr);

    let tools = McpSshCommands::new(service.clone());
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| McpServer::new().tools(tools.clone())),
        )
        .with(Tracing);

    info!("MCP Server with SSH support is ready");
    info!("Use the list_hosts command to discover configured hosts");

    // Run the MCP server until Ctrl-C, then close every SSH session
    Server::new(TcpListener::bind(mcp_addr))
        .name("SSH MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            None,
        )
        .await?;

    service.shutdown().await;
    Ok(())
}
