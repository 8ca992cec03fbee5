use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, app};
use td_core::account::{AccountSeed, provision_account};
use td_core::constants::DEFAULT_DATA_DIR;
use td_core::{
    CaseMetadataStore, CaseService, CoreConfig, EmailConfig, FileCaseStore, MemoryCaseStore,
    VaultEmailNotifier,
};
use td_types::{GroupId, SchemaId, VaultId};
use td_vault::VaultClient;
use td_vault::http::HttpVaultClient;
use td_vault::memory::MemoryVault;

/// Main entry point for the TrueDiagnostics internal metadata API
///
/// Serves the REST API on `TD_REST_ADDR` (default: "0.0.0.0:3001").
///
/// With `TD_IN_MEMORY=1` the server runs against an in-process vault and an in-memory case
/// store, seeded with a demo account whose credentials are printed to stdout. Otherwise it talks
/// to the TrueVault API and stores case metadata under `TD_DATA_DIR`.
///
/// # Environment Variables
/// - `TD_REST_ADDR`: REST server address
/// - `TD_DATA_DIR`: Directory for case metadata (default: "td_data")
/// - `TD_IN_MEMORY`: Run against the in-process vault
/// - `TV_API_URL`: Vault API base URL (default: "https://api.truevault.com/v1/")
/// - `TV_CASES_VAULT_ID`, `TV_CASES_SCHEMA_ID`, `TV_PATIENTS_GROUP_ID`: vault objects
/// - `SENDGRID_API_KEY`, `SENDGRID_INVITE_PATIENT_TEMPLATE_ID`, `SENDGRID_APPROVED_TEMPLATE_ID`
/// - `TD_EMAIL_FROM`: Sender address (default: "sample-app@truevault.com")
///
/// # Errors
/// Returns an error if:
/// - a required variable is missing or invalid,
/// - the demo account cannot be provisioned, or
/// - the server address cannot be bound or the HTTP server fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("td_run=info".parse()?)
                .add_directive("td_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("TD_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let in_memory = std::env::var("TD_IN_MEMORY")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let service = if in_memory {
        in_memory_service().await?
    } else {
        vault_service()?
    };

    tracing::info!("++ Starting TrueDiagnostics REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app(AppState::new(service))).await?;

    Ok(())
}

fn required_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{name} must be set"))
}

fn email_config(fallback: Option<&str>) -> anyhow::Result<EmailConfig> {
    let var = |name: &str| match fallback {
        Some(value) => Ok(std::env::var(name).unwrap_or_else(|_| value.to_owned())),
        None => required_env(name),
    };
    let from = std::env::var("TD_EMAIL_FROM").ok();
    Ok(EmailConfig::new(
        &var("SENDGRID_API_KEY")?,
        &var("SENDGRID_INVITE_PATIENT_TEMPLATE_ID")?,
        &var("SENDGRID_APPROVED_TEMPLATE_ID")?,
        from.as_deref(),
    )?)
}

fn vault_service() -> anyhow::Result<CaseService> {
    let data_dir = std::env::var("TD_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
    let schema_id = std::env::var("TV_CASES_SCHEMA_ID")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SchemaId::parse)
        .transpose()?;
    let email = email_config(None)?;
    let cfg = Arc::new(CoreConfig::new(
        PathBuf::from(data_dir),
        VaultId::parse(required_env("TV_CASES_VAULT_ID")?)?,
        schema_id,
        GroupId::parse(required_env("TV_PATIENTS_GROUP_ID")?)?,
        email.clone(),
    )?);

    let vault: Arc<dyn VaultClient> = match std::env::var("TV_API_URL") {
        Ok(url) => Arc::new(HttpVaultClient::with_base_url(&url)?),
        Err(_) => Arc::new(HttpVaultClient::new()?),
    };
    tracing::info!(
        "using vault {} with case metadata in {}",
        cfg.cases_vault_id(),
        cfg.cases_dir().display()
    );

    let store: Arc<dyn CaseMetadataStore> = Arc::new(FileCaseStore::new(&cfg));
    let notifier = Arc::new(VaultEmailNotifier::new(vault.clone(), email));
    Ok(CaseService::new(cfg, vault, store, notifier))
}

async fn in_memory_service() -> anyhow::Result<CaseService> {
    let vault = Arc::new(MemoryVault::new());
    let vault_id = VaultId::parse(
        std::env::var("TV_CASES_VAULT_ID").unwrap_or_else(|_| "cases".into()),
    )?;
    let account = provision_account(
        vault.as_ref(),
        vault.root_token(),
        &vault_id,
        &AccountSeed::new("local"),
    )
    .await?;

    // Demo credentials go to stdout, never to the log.
    println!("# In-memory demo account");
    for user in std::iter::once(&account.admin).chain(&account.doctors) {
        if let Some(key) = &user.api_key {
            println!("{}\t{}\t{}", user.name, user.id, key.expose());
        }
    }

    let email = email_config(Some("in-memory"))?;
    let cfg = Arc::new(CoreConfig::new(
        PathBuf::from(DEFAULT_DATA_DIR),
        vault_id,
        None,
        account.patients_group_id.clone(),
        email.clone(),
    )?);
    tracing::warn!("running against the in-process vault; nothing is persisted");

    let notifier = Arc::new(VaultEmailNotifier::new(vault.clone(), email));
    Ok(CaseService::new(
        cfg,
        vault,
        Arc::new(MemoryCaseStore::new()),
        notifier,
    ))
}
