//! `config check` command: load and validate configuration, print the
//! resolved cluster view, exit without starting a replica.

use anyhow::{Context, Result};
use qkv_config::ConfigLoader;

pub fn check(file: Option<String>, env_prefix: &str) -> Result<()> {
    let mut loader = ConfigLoader::new().with_env_prefix(env_prefix.to_string());
    if let Some(file) = &file {
        loader = loader.with_file(file);
    }

    match loader.load() {
        Ok(config) => {
            println!("Configuration is valid");
            println!();
            println!("Engine:     {:?}", config.engine);
            println!("Replica id: {}", config.replica_id);
            println!("Malicious:  {}", config.malicious);
            println!("Data dir:   {}", config.data_dir.display());
            println!("Members ({}):", config.cluster_size());
            for member in &config.members {
                let marker = if member.id == config.replica_id { " (self)" } else { "" };
                println!("  {:>3}  {}:{}{marker}", member.id, member.host, member.port);
            }
            Ok(())
        }
        Err(err) => {
            println!("Configuration validation failed:");
            println!("  {err}");
            Err(err).context("configuration is invalid")
        }
    }
}
