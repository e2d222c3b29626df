use crate::{
    cli::telemetry,
    sso::{
        self,
        config::{AdaptiveConfig, ServiceDefinition, SsoConfig, StepUpRule, TicketConfig},
        metadata::MetadataConfig,
    },
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub accept_users: Option<SecretString>,
    pub surrogate_separator: String,
    pub services: Vec<ServiceDefinition>,
    pub registry_name: String,
    pub registry_capacity_bytes: u64,
    pub registry_eviction_warn: Option<u64>,
    pub tickets: TicketConfig,
    pub clearpass: bool,
    pub clearpass_key: Option<SecretString>,
    pub adaptive: AdaptiveConfig,
    pub step_up: Vec<StepUpRule>,
}

impl Args {
    #[must_use]
    pub fn sso_config(&self) -> SsoConfig {
        SsoConfig {
            accept_users: self.accept_users.clone(),
            surrogate_separator: self.surrogate_separator.clone(),
            metadata: MetadataConfig {
                cache_credential: self.clearpass,
                ..MetadataConfig::default()
            },
            clearpass_key: self.clearpass_key.clone(),
            tickets: self.tickets.clone(),
            adaptive: self.adaptive.clone(),
            step_up: self.step_up.clone(),
            services: self.services.clone(),
            registry_name: self.registry_name.clone(),
            registry_capacity_bytes: self.registry_capacity_bytes,
            registry_eviction_warn: self.registry_eviction_warn,
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let sso = args.sso_config().build()?;
    let result = sso::new(args.port, sso).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("accept_users_set", args.accept_users.is_some().to_string()),
        ("surrogate_separator", args.surrogate_separator.clone()),
        ("services", args.services.len().to_string()),
        ("registry", args.registry_name.clone()),
        (
            "registry_capacity",
            if args.registry_capacity_bytes == 0 {
                "unbounded".to_string()
            } else {
                sso::monitor::format_memory(args.registry_capacity_bytes)
            },
        ),
        (
            "tgt_lifetime",
            format!(
                "{}s max, {}s idle",
                args.tickets.tgt_max_time_to_live_seconds, args.tickets.tgt_time_to_kill_seconds
            ),
        ),
        (
            "st_lifetime",
            format!(
                "{}s, {} use(s)",
                args.tickets.st_time_to_live_seconds, args.tickets.st_number_of_uses
            ),
        ),
        ("clearpass", args.clearpass.to_string()),
        ("step_up_rules", args.step_up.len().to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", portero_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn portero_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    format!(
        "P O R T E R O - {} - {}",
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
