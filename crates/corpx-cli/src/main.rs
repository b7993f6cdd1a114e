//! 🚀 corpx: the front door. Loads config, sets up logging, builds the
//! runtime, and hands everything to [`corpx::run`].
//!
//! Usage: `corpx [path/to/corpx.toml]`. Without a path, `corpx.toml` in the
//! working directory is used if it exists; otherwise env vars carry it all.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // 📡 RUST_LOG decides how chatty we are
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path_arg = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("corpx.toml"));

    let config_file = std::path::Path::new(&path_arg);
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't even check whether the config file exists. Permissions? Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => {
            info!(
                "🔧 No config file at '{}'. Going with env vars and defaults.",
                config_file.display()
            );
            None
        }
    };

    let app_config = corpx::app_config::load_config(config_file)
        .context("💀 Couldn't load the config. Check the TOML and any CORPX_* env vars.")?;

    // 🧵 one worker thread per configured worker, not one per core
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(app_config.runtime.worker_count.max(1))
        .enable_all()
        .build()
        .context("💀 Couldn't build the tokio runtime")?;

    if let Err(err) = runtime.block_on(corpx::run(app_config)) {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, and sniff each layer for a connectivity smell
        let mut looks_like_connectivity = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                looks_like_connectivity = true;
            }
        }

        if looks_like_connectivity {
            error!(
                "🔧 hint: the document store doesn't seem reachable. Check that it's \
                running and that [store] points at it. With Docker: `docker ps`, \
                then `docker compose up -d`."
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
