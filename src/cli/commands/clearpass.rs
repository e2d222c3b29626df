use clap::{Arg, ArgAction, Command};

pub const ARG_CLEARPASS: &str = "clearpass";
pub const ARG_CLEARPASS_KEY: &str = "clearpass-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLEARPASS)
                .long(ARG_CLEARPASS)
                .help("Cache the presented password, encrypted, in the authentication")
                .env("PORTERO_CLEARPASS")
                .action(ArgAction::SetTrue)
                .requires(ARG_CLEARPASS_KEY),
        )
        .arg(
            Arg::new(ARG_CLEARPASS_KEY)
                .long(ARG_CLEARPASS_KEY)
                .help("Base64 encoded 32 byte key used to encrypt cached passwords")
                .env("PORTERO_CLEARPASS_KEY")
                .hide_env_values(true),
        )
}
