#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use mcp_ssh::mcp::McpSshCommands;
use mcp_ssh::mcp::logging::init_logging;
use mcp_ssh::mcp::service::SshService;
use poem_mcpserver::McpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let logging = init_logging();
    let args: Vec<String> = std::env::args().collect();
    let service = Arc::new(SshService::bootstrap(&args, &logging)?);

    let result =
        poem_mcpserver::stdio::stdio(McpServer::new().tools(McpSshCommands::new(service.clone())))
            .await;
    service.shutdown().await;
    result?;
    Ok(())
}
