use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{self, clearpass, policy, tickets},
    },
    sso::config::{AdaptiveConfig, ServiceDefinition, StepUpRule, TicketConfig},
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if an argument cannot be interpreted.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let accept_users = matches
        .get_one::<String>(commands::ARG_ACCEPT_USERS)
        .cloned()
        .map(SecretString::from);

    let surrogate_separator = matches
        .get_one::<String>(commands::ARG_SURROGATE_SEPARATOR)
        .cloned()
        .context("missing required argument: --surrogate-separator")?;
    anyhow::ensure!(
        !surrogate_separator.is_empty(),
        "--surrogate-separator must not be empty"
    );

    let mut services = Vec::new();
    for definition in values(matches, commands::ARG_SERVICE) {
        services.push(ServiceDefinition::parse(definition, true)?);
    }
    for definition in values(matches, commands::ARG_NON_SSO_SERVICE) {
        services.push(ServiceDefinition::parse(definition, false)?);
    }

    let registry_name = matches
        .get_one::<String>(commands::ARG_REGISTRY_NAME)
        .cloned()
        .context("missing required argument: --registry-name")?;

    Ok(Action::Server(Args {
        port,
        accept_users,
        surrogate_separator,
        services,
        registry_name,
        registry_capacity_bytes: matches
            .get_one::<u64>(commands::ARG_REGISTRY_CAPACITY)
            .copied()
            .unwrap_or(0),
        registry_eviction_warn: matches
            .get_one::<u64>(commands::ARG_REGISTRY_EVICTION_WARN)
            .copied(),
        tickets: ticket_config(matches),
        clearpass: matches.get_flag(clearpass::ARG_CLEARPASS),
        clearpass_key: matches
            .get_one::<String>(clearpass::ARG_CLEARPASS_KEY)
            .cloned()
            .map(SecretString::from),
        adaptive: AdaptiveConfig {
            rejected_ip_pattern: matches.get_one::<String>(policy::ARG_REJECTED_IP).cloned(),
            rejected_browsers_pattern: matches
                .get_one::<String>(policy::ARG_REJECTED_BROWSERS)
                .cloned(),
            rejected_countries: values(matches, policy::ARG_REJECTED_COUNTRIES)
                .map(str::to_string)
                .collect(),
        },
        step_up: step_up_rules(matches)?,
    }))
}

fn values<'a>(matches: &'a clap::ArgMatches, id: &str) -> impl Iterator<Item = &'a str> {
    matches
        .get_many::<String>(id)
        .into_iter()
        .flatten()
        .map(String::as_str)
}

fn ticket_config(matches: &clap::ArgMatches) -> TicketConfig {
    let defaults = TicketConfig::default();
    TicketConfig {
        tgt_max_time_to_live_seconds: matches
            .get_one::<i64>(tickets::ARG_TGT_MAX_TTL)
            .copied()
            .unwrap_or(defaults.tgt_max_time_to_live_seconds),
        tgt_time_to_kill_seconds: matches
            .get_one::<i64>(tickets::ARG_TGT_TTK)
            .copied()
            .unwrap_or(defaults.tgt_time_to_kill_seconds),
        remember_me_time_to_live_seconds: matches
            .get_one::<i64>(tickets::ARG_REMEMBER_ME_TTL)
            .copied(),
        st_time_to_live_seconds: matches
            .get_one::<i64>(tickets::ARG_ST_TTL)
            .copied()
            .unwrap_or(defaults.st_time_to_live_seconds),
        st_number_of_uses: matches
            .get_one::<u32>(tickets::ARG_ST_USES)
            .copied()
            .unwrap_or(defaults.st_number_of_uses),
        cleaner_interval_seconds: matches
            .get_one::<u64>(tickets::ARG_CLEANER_INTERVAL)
            .copied()
            .unwrap_or(defaults.cleaner_interval_seconds),
        id_suffix: matches
            .get_one::<String>(tickets::ARG_TICKET_SUFFIX)
            .cloned()
            .unwrap_or(defaults.id_suffix),
    }
}

/// Parse `provider,attribute,pattern` and `provider,pattern` rules. The
/// pattern comes last so it may itself contain commas.
fn step_up_rules(matches: &clap::ArgMatches) -> Result<Vec<StepUpRule>> {
    let mut rules = Vec::new();
    for rule in values(matches, policy::ARG_MFA_ATTRIBUTE) {
        let mut parts = rule.splitn(3, ',').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(provider), Some(attribute), Some(pattern))
                if !provider.is_empty() && !attribute.is_empty() =>
            {
                rules.push(StepUpRule::PrincipalAttribute {
                    attribute: attribute.to_string(),
                    pattern: pattern.to_string(),
                    provider: provider.to_string(),
                });
            }
            _ => anyhow::bail!("Invalid --mfa-attribute, expected provider,attribute,pattern: {rule}"),
        }
    }
    for rule in values(matches, policy::ARG_MFA_SERVICE) {
        match rule.split_once(',') {
            Some((provider, pattern)) if !provider.trim().is_empty() => {
                rules.push(StepUpRule::Service {
                    pattern: pattern.trim().to_string(),
                    provider: provider.trim().to_string(),
                });
            }
            _ => anyhow::bail!("Invalid --mfa-service, expected provider,pattern: {rule}"),
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::ExposeSecret;

    fn action(args: &[&str]) -> Result<Args> {
        let matches = commands::new().try_get_matches_from(args)?;
        let Action::Server(args) = handler(&matches)?;
        Ok(args)
    }

    #[test]
    fn test_handler_defaults() -> Result<()> {
        let args = temp_env::with_vars(
            [
                ("PORTERO_ACCEPT_USERS", None::<String>),
                ("PORTERO_SERVICES", None::<String>),
                ("PORTERO_REMEMBER_ME_TIME_TO_LIVE", None::<String>),
            ],
            || action(&["portero"]),
        )?;
        assert_eq!(args.port, 8080);
        assert!(args.accept_users.is_none());
        assert_eq!(args.surrogate_separator, "+");
        assert!(args.services.is_empty());
        assert_eq!(args.tickets, TicketConfig::default());
        assert!(args.step_up.is_empty());
        Ok(())
    }

    #[test]
    fn test_handler_full() -> Result<()> {
        let args = action(&[
            "portero",
            "--port",
            "9090",
            "--accept-users",
            "alice::secret",
            "--surrogate-separator",
            "/",
            "--service",
            r"app=^https://app\.example\.org/.*",
            "--non-sso-service",
            r"bank=^https://bank\.example\.org/.*",
            "--remember-me-time-to-live",
            "1209600",
            "--rejected-countries",
            "KP,RU",
            "--mfa-attribute",
            r"mfa-duo,memberOf,^admins$",
            "--mfa-service",
            r"mfa-gauth,^https://bank\.example\.org/.*",
            "--registry-capacity",
            "1048576",
            "--registry-eviction-warn",
            "50",
        ])?;
        assert_eq!(args.registry_capacity_bytes, 1_048_576);
        assert_eq!(args.registry_eviction_warn, Some(50));
        assert_eq!(args.port, 9090);
        assert_eq!(
            args.accept_users.as_ref().map(|s| s.expose_secret().to_string()),
            Some("alice::secret".to_string())
        );
        assert_eq!(args.surrogate_separator, "/");
        assert_eq!(args.services.len(), 2);
        assert!(args.services[0].sso_enabled);
        assert!(!args.services[1].sso_enabled);
        assert_eq!(args.tickets.remember_me_time_to_live_seconds, Some(1_209_600));
        assert_eq!(args.adaptive.rejected_countries, vec!["KP", "RU"]);
        assert_eq!(
            args.step_up,
            vec![
                StepUpRule::PrincipalAttribute {
                    attribute: "memberOf".to_string(),
                    pattern: "^admins$".to_string(),
                    provider: "mfa-duo".to_string(),
                },
                StepUpRule::Service {
                    pattern: r"^https://bank\.example\.org/.*".to_string(),
                    provider: "mfa-gauth".to_string(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_invalid_service_definition() {
        assert!(action(&["portero", "--service", "no-equals-sign"]).is_err());
    }

    #[test]
    fn test_lifetimes_are_bounded() {
        assert!(action(&["portero", "--tgt-max-time-to-live", "9300000000000000"]).is_err());
        assert!(action(&["portero", "--st-time-to-live", "315360001"]).is_err());
        assert!(action(&["portero", "--cleaner-interval", "18446744073709551615"]).is_err());
        assert!(action(&["portero", "--tgt-time-to-kill", "315360000"]).is_ok());
    }

    #[test]
    fn test_invalid_step_up_rule() {
        assert!(action(&["portero", "--mfa-attribute", "mfa-duo"]).is_err());
        assert!(action(&["portero", "--mfa-service", "mfa-duo"]).is_err());
    }
}
