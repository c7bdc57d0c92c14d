use std::{env, env::VarError, str::FromStr, sync::Arc};

use shop_payment_engine::{
    db_types::AuditChain,
    traits::PaymentStore,
    AuditApi,
    AuditError,
    PostgresDatabase,
    SqliteDatabase,
    SystemClock,
};

use crate::{config::ServerConfig, errors::ServerError, server::Backend};

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Help,
    /// Replay the given audit chains offline and report the first broken entry, if any
    VerifyAudit(Vec<AuditChain>),
}

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn parse_command_line_args<S: AsRef<str>>(args: &[S]) -> Command {
    match args.first().map(|s| s.as_ref()) {
        None => Command::Serve,
        Some("verify-audit") => match args.get(1).map(|s| s.as_ref()) {
            None | Some("all") => Command::VerifyAudit(AuditChain::ALL.to_vec()),
            Some(chain) => match AuditChain::from_str(chain) {
                Ok(chain) => Command::VerifyAudit(vec![chain]),
                Err(e) => {
                    eprintln!("{e}. Expected one of product, content, security or all.");
                    Command::Help
                },
            },
        },
        Some(_) => Command::Help,
    }
}

pub fn display_help() {
    display_readme();
    display_envs();
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets. The database URL can
    // carry a password, so it is left out too.
    const DISPLAY_ENVS: [&str; 25] = [
        "RUST_LOG",
        "SPG_HOST",
        "SPG_PORT",
        "SPG_DB_MAX_CONNECTIONS",
        "SPG_LEADER_POOL_SIZE",
        "SPG_LEADER_RETRY_SECS",
        "SPG_LOCK_NAMESPACE",
        "SPG_ORDER_PAYMENT_TTL_MINS",
        "SPG_EXPIRY_SWEEP_SECS",
        "SPG_WEBHOOK_RETRY_SWEEP_SECS",
        "SPG_WEBHOOK_RETRY_BASE_SECS",
        "SPG_WEBHOOK_RETRY_MAX_DELAY_SECS",
        "SPG_WEBHOOK_MAX_ATTEMPTS",
        "SPG_WEBHOOK_SIGNATURE_CHECKS",
        "SPG_STRIPE_TOLERANCE_SECS",
        "SPG_AUDIT_CHAIN_ENABLED",
        "SPG_CURRENCY",
        "SPG_ROUNDING_MODE",
        "SPG_FEE_ENABLED",
        "SPG_FEE_TYPE",
        "SPG_FEE_VALUE",
        "SPG_VAT_ENABLED",
        "SPG_VAT_RATE",
        "SPG_VAT_APPLY_TO_SHIPPING",
        "SPG_VAT_APPLY_TO_FEE",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}

/// Verifies each chain in turn and prints a line per chain. Returns `Ok(false)` if any chain is broken.
pub async fn verify_audit_chains(config: &ServerConfig, chains: &[AuditChain]) -> Result<bool, ServerError> {
    let url = config.database_url.reveal();
    match Backend::from_url(url)? {
        Backend::Sqlite => {
            let db = SqliteDatabase::new_with_url(url, 1).await?;
            verify_with(db, config, chains).await
        },
        Backend::Postgres => {
            let db = PostgresDatabase::new_with_url(url, 1).await?;
            verify_with(db, config, chains).await
        },
    }
}

async fn verify_with<B: PaymentStore>(
    mut db: B,
    config: &ServerConfig,
    chains: &[AuditChain],
) -> Result<bool, ServerError> {
    let api = AuditApi::new(db.clone(), config.audit.clone(), Arc::new(SystemClock));
    let mut intact = true;
    for &chain in chains {
        match api.verify_chain(chain).await {
            Ok(report) => println!(
                "✅️ {chain}: {} entries, {} verified, {} unchained. Tail {}",
                report.entries,
                report.verified,
                report.unchained,
                report.tail_hash.as_deref().unwrap_or("-")
            ),
            Err(e @ AuditError::ChainMismatch { .. }) => {
                intact = false;
                println!("❌️ {e}");
            },
            Err(e) => {
                db.close().await.ok();
                return Err(e.into());
            },
        }
    }
    db.close().await?;
    Ok(intact)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn commands() {
        assert_eq!(parse_command_line_args::<&str>(&[]), Command::Serve);
        assert_eq!(parse_command_line_args(&["--help"]), Command::Help);
        assert_eq!(parse_command_line_args(&["verify-audit"]), Command::VerifyAudit(AuditChain::ALL.to_vec()));
        assert_eq!(parse_command_line_args(&["verify-audit", "all"]), Command::VerifyAudit(AuditChain::ALL.to_vec()));
        assert_eq!(
            parse_command_line_args(&["verify-audit", "security"]),
            Command::VerifyAudit(vec![AuditChain::Security])
        );
        assert_eq!(parse_command_line_args(&["verify-audit", "ledger"]), Command::Help);
    }
}
