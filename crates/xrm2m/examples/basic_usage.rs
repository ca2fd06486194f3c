//! Basic usage example for xrm2m
//!
//! Connects to a router, reads the hostname, changes it and commits.
//!
//! ```text
//! XR_HOST=router:22 XR_USER=cisco XR_PASSWORD=cisco RUST_LOG=xrm2m=debug \
//!     cargo run --example basic_usage
//! ```

use std::env;
use std::error::Error;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use xrm2m::ClientBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = env::var("XR_HOST").unwrap_or_else(|_| "router:22".to_string());
    let user = env::var("XR_USER").unwrap_or_else(|_| "cisco".to_string());
    let password = env::var("XR_PASSWORD").unwrap_or_default();

    println!("Connecting to {} as {}...", host, user);
    let mut client = ClientBuilder::new(host)
        .with_user(user)
        .with_password(password)
        .with_timeout(Duration::from_secs(30))
        .connect()
        .await?;

    let version = client.get_version().await;
    println!("M2M API version: {:?}", version);

    println!("{}", client.cli_exec("show clock").await);

    let hostname = client.get_value("RootCfg.Hostname").await;
    println!("Current hostname: {}", hostname);

    client.set("RootCfg.Hostname", "xr-lab-1").await;
    for change in client.get_changes().await {
        println!("Pending: {:?}", change);
    }

    match client.commit(Some("rename from basic_usage"), None).await {
        Some(id) => println!("Committed as {}", id),
        None if !client.is_faulted() => println!("Nothing to commit"),
        None => {}
    }

    client.into_result().await?;
    Ok(())
}
