use clap::{Arg, Command};

pub const ARG_TGT_MAX_TTL: &str = "tgt-max-time-to-live";
pub const ARG_TGT_TTK: &str = "tgt-time-to-kill";
pub const ARG_REMEMBER_ME_TTL: &str = "remember-me-time-to-live";
pub const ARG_ST_TTL: &str = "st-time-to-live";
pub const ARG_ST_USES: &str = "st-number-of-uses";
pub const ARG_CLEANER_INTERVAL: &str = "cleaner-interval";
pub const ARG_TICKET_SUFFIX: &str = "ticket-suffix";

/// Ten years. Larger lifetimes overflow date arithmetic long before they matter.
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;
pub const MAX_CLEANER_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TGT_MAX_TTL)
                .long(ARG_TGT_MAX_TTL)
                .help("Maximum lifetime of a single sign-on session in seconds")
                .default_value("28800")
                .env("PORTERO_TGT_MAX_TIME_TO_LIVE")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_TGT_TTK)
                .long(ARG_TGT_TTK)
                .help("Idle timeout of a single sign-on session in seconds")
                .default_value("7200")
                .env("PORTERO_TGT_TIME_TO_KILL")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_ME_TTL)
                .long(ARG_REMEMBER_ME_TTL)
                .help("Lifetime of remember-me sessions in seconds")
                .long_help(
                    "Lifetime of remember-me sessions in seconds. When unset, remember-me sessions expire like any other session.",
                )
                .env("PORTERO_REMEMBER_ME_TIME_TO_LIVE")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_ST_TTL)
                .long(ARG_ST_TTL)
                .help("Lifetime of a service ticket in seconds")
                .default_value("10")
                .env("PORTERO_ST_TIME_TO_LIVE")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_ST_USES)
                .long(ARG_ST_USES)
                .help("Number of validations a service ticket allows")
                .default_value("1")
                .env("PORTERO_ST_NUMBER_OF_USES")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_CLEANER_INTERVAL)
                .long(ARG_CLEANER_INTERVAL)
                .help("Seconds between registry cleaner passes")
                .default_value("120")
                .env("PORTERO_CLEANER_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_CLEANER_INTERVAL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_TICKET_SUFFIX)
                .long(ARG_TICKET_SUFFIX)
                .help("Suffix appended to ticket ids to identify this node")
                .env("PORTERO_TICKET_SUFFIX"),
        )
}
