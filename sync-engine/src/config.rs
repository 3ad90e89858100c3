use clap::Parser;

/// Configuration for the sync engine binary: bind address plus the same
/// reconnect/timeout knobs a client would configure, surfaced here so an
/// operator can see what the clients hitting this server are tuned for.
#[derive(Debug, Clone, Parser)]
#[command(name = "sync-engine")]
#[command(about = "Real-time relational sync server")]
pub struct EngineConfig {
    /// Address to bind the HTTP/WS listener on.
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Custom-mutation reply timeout clients are told to expect, seconds.
    #[arg(long, env, default_value = "5")]
    pub reply_timeout_secs: u64,

    /// Emit logs as JSON instead of the default human-readable format.
    #[arg(long, env, default_value = "false")]
    pub log_json: bool,
}

impl EngineConfig {
    pub fn parse_config() -> Self {
        EngineConfig::parse()
    }
}
