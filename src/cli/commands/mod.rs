pub mod clearpass;
pub mod logging;
pub mod policy;
pub mod tickets;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_ACCEPT_USERS: &str = "accept-users";
pub const ARG_SURROGATE_SEPARATOR: &str = "surrogate-separator";
pub const ARG_SERVICE: &str = "service";
pub const ARG_NON_SSO_SERVICE: &str = "non-sso-service";
pub const ARG_REGISTRY_NAME: &str = "registry-name";
pub const ARG_REGISTRY_CAPACITY: &str = "registry-capacity";
pub const ARG_REGISTRY_EVICTION_WARN: &str = "registry-eviction-warn";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("portero")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("PORTERO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_ACCEPT_USERS)
                .long(ARG_ACCEPT_USERS)
                .help("Static users, example: alice::secret,bob::hunter2")
                .env("PORTERO_ACCEPT_USERS")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SURROGATE_SEPARATOR)
                .long(ARG_SURROGATE_SEPARATOR)
                .help("Separator between surrogate and real username")
                .default_value(crate::sso::config::DEFAULT_SURROGATE_SEPARATOR)
                .env("PORTERO_SURROGATE_SEPARATOR"),
        )
        .arg(
            Arg::new(ARG_SERVICE)
                .short('s')
                .long(ARG_SERVICE)
                .help("Registered service as name=regex, repeatable")
                .env("PORTERO_SERVICES")
                .value_delimiter(';')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_NON_SSO_SERVICE)
                .long(ARG_NON_SSO_SERVICE)
                .help("Registered service that always requires a fresh login, as name=regex")
                .env("PORTERO_NON_SSO_SERVICES")
                .value_delimiter(';')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_REGISTRY_NAME)
                .long(ARG_REGISTRY_NAME)
                .help("Name reported in ticket registry statistics")
                .default_value(crate::sso::config::DEFAULT_REGISTRY_NAME)
                .env("PORTERO_REGISTRY_NAME"),
        )
        .arg(
            Arg::new(ARG_REGISTRY_CAPACITY)
                .long(ARG_REGISTRY_CAPACITY)
                .help("Ticket registry size in bytes used for health, 0 for unbounded")
                .default_value("0")
                .env("PORTERO_REGISTRY_CAPACITY")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REGISTRY_EVICTION_WARN)
                .long(ARG_REGISTRY_EVICTION_WARN)
                .help("Report the registry as degraded past this many evictions")
                .env("PORTERO_REGISTRY_EVICTION_WARN")
                .value_parser(clap::value_parser!(u64)),
        );

    let command = tickets::with_args(command);
    let command = clearpass::with_args(command);
    let command = policy::with_args(command);
    logging::with_args(command)
}
