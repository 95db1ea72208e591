//! `portico server`: Start the Portico HTTP backend server.

pub async fn run(config: portico_server::ServerConfig) -> Result<(), String> {
    println!("Starting Portico server on {}:{}...", config.host, config.port);

    let addr = portico_server::start_server(config).await?;
    println!("Portico server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
