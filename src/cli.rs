use clap::{Parser, Subcommand};

/// Token-gated image proxy for third-party image generation APIs
#[derive(Parser)]
#[command(name = "image-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to IMAGE_GATEWAY_PORT or 5000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check whether the proxy would fetch from a URL's host
    CheckOrigin {
        /// Upstream image URL
        url: String,
    },
}
