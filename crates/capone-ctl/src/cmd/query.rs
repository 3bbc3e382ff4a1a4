//! Query a service port for what it exposes.

use capone_core::client;
use capone_core::config::Config;
use capone_core::error::Result;

use super::{open_channel, Target};

pub async fn run(config: &Config, target: &Target) -> Result<()> {
    let mut channel = open_channel(config, target).await?;
    let description = client::query(&mut channel).await?;

    println!("name:     {}", description.name);
    println!("category: {}", description.category);
    println!("type:     {}", description.kind);
    println!("version:  {}", description.version);
    println!("location: {}", description.location);
    println!("port:     {}", description.port);
    Ok(())
}
