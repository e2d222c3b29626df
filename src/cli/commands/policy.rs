use clap::{Arg, ArgAction, Command};

pub const ARG_REJECTED_IP: &str = "rejected-ip";
pub const ARG_REJECTED_BROWSERS: &str = "rejected-browsers";
pub const ARG_REJECTED_COUNTRIES: &str = "rejected-countries";
pub const ARG_MFA_ATTRIBUTE: &str = "mfa-attribute";
pub const ARG_MFA_SERVICE: &str = "mfa-service";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REJECTED_IP)
                .long(ARG_REJECTED_IP)
                .help("Regex of client addresses that may not authenticate")
                .env("PORTERO_REJECTED_IP"),
        )
        .arg(
            Arg::new(ARG_REJECTED_BROWSERS)
                .long(ARG_REJECTED_BROWSERS)
                .help("Regex of user agents that may not authenticate")
                .env("PORTERO_REJECTED_BROWSERS"),
        )
        .arg(
            Arg::new(ARG_REJECTED_COUNTRIES)
                .long(ARG_REJECTED_COUNTRIES)
                .help("Comma separated country codes that may not authenticate")
                .env("PORTERO_REJECTED_COUNTRIES")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_MFA_ATTRIBUTE)
                .long(ARG_MFA_ATTRIBUTE)
                .help("Step-up rule on a principal attribute: provider,attribute,pattern")
                .env("PORTERO_MFA_ATTRIBUTE")
                .value_delimiter(';')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_MFA_SERVICE)
                .long(ARG_MFA_SERVICE)
                .help("Step-up rule on the service URL: provider,pattern")
                .env("PORTERO_MFA_SERVICE")
                .value_delimiter(';')
                .action(ArgAction::Append),
        )
}
