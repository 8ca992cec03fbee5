use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use td_core::account::{
    admins_policy, doctors_policy, patients_policy, provision_account, AccountSeed,
};
use td_core::{
    format_duration, CaseDetails, CaseService, CaseSubmission, CoreConfig, DiagnosisDocument,
    EmailConfig, FileCaseStore, Session, StageStats, VaultEmailNotifier,
};
use td_types::{AccessToken, DocumentId, GroupId, SchemaId, UserId, VaultId};
use td_vault::http::{HttpVaultClient, DEFAULT_BASE_URL};
use td_vault::{BlobUpload, UploadProgress, VaultClient};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "td")]
#[command(about = "TrueDiagnostics case review CLI")]
struct Cli {
    #[command(flatten)]
    vault: VaultArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct VaultArgs {
    /// Vault API base URL
    #[arg(long, env = "TV_API_URL", default_value = DEFAULT_BASE_URL, global = true)]
    api_url: String,
    /// Vault holding case documents, diagnoses and images
    #[arg(long, env = "TV_CASES_VAULT_ID", global = true)]
    vault_id: Option<String>,
}

/// Settings needed by the workflow commands.
#[derive(Args)]
struct WorkflowArgs {
    /// Access token or API key of the acting user
    #[arg(long, env = "TV_ACCESS_TOKEN", hide_env_values = true)]
    token: String,
    /// Directory holding case metadata
    #[arg(long, env = "TD_DATA_DIR", default_value = td_core::constants::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    #[arg(long, env = "TV_CASES_SCHEMA_ID")]
    schema_id: Option<String>,
    #[arg(long, env = "TV_PATIENTS_GROUP_ID")]
    patients_group_id: String,
    #[arg(long, env = "SENDGRID_API_KEY", hide_env_values = true)]
    sendgrid_api_key: String,
    #[arg(long, env = "SENDGRID_INVITE_PATIENT_TEMPLATE_ID")]
    invite_template_id: String,
    #[arg(long, env = "SENDGRID_APPROVED_TEMPLATE_ID")]
    approved_template_id: String,
    #[arg(long, env = "TD_EMAIL_FROM")]
    email_from: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the standing group policies as JSON
    Policies,
    /// Create the admin and doctor users and the standing groups
    Setup {
        /// Token of a vault user allowed to create users and groups
        #[arg(long, env = "TV_ROOT_TOKEN", hide_env_values = true)]
        root_token: String,
        /// Appended to every username and group name
        #[arg(long)]
        suffix: String,
        /// Doctor last names (comma-separated)
        #[arg(long, value_delimiter = ',')]
        doctors: Vec<String>,
        /// Password for every created user; API-key only when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Upload images, create the case documents and create the case
    SubmitCase {
        #[command(flatten)]
        workflow: WorkflowArgs,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        case_id: String,
        #[arg(long)]
        patient_name: String,
        #[arg(long)]
        sex: String,
        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        dob: NaiveDate,
        #[arg(long)]
        height: u32,
        #[arg(long)]
        weight: u32,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due_date: NaiveDate,
        /// Image files to attach
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Submit a diagnosis for a case assigned to you
    Review {
        #[command(flatten)]
        workflow: WorkflowArgs,
        case_doc_id: String,
        #[arg(long)]
        summary: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Approve a reviewed case assigned to you
    Approve {
        #[command(flatten)]
        workflow: WorkflowArgs,
        case_doc_id: String,
    },
    /// List the cases waiting on you
    Inbox {
        #[command(flatten)]
        workflow: WorkflowArgs,
    },
    /// Show response-time statistics
    Stats {
        #[command(flatten)]
        workflow: WorkflowArgs,
    },
}

impl VaultArgs {
    fn vault_id(&self) -> anyhow::Result<VaultId> {
        let Some(raw) = self.vault_id.as_deref() else {
            bail!("--vault-id (or TV_CASES_VAULT_ID) is required for this command");
        };
        Ok(VaultId::parse(raw)?)
    }

    fn client(&self) -> anyhow::Result<Arc<dyn VaultClient>> {
        Ok(Arc::new(HttpVaultClient::with_base_url(&self.api_url)?))
    }
}

impl WorkflowArgs {
    async fn connect(&self, vault: &VaultArgs) -> anyhow::Result<(CaseService, Session)> {
        let email = EmailConfig::new(
            &self.sendgrid_api_key,
            &self.invite_template_id,
            &self.approved_template_id,
            self.email_from.as_deref(),
        )?;
        let cfg = Arc::new(CoreConfig::new(
            self.data_dir.clone(),
            vault.vault_id()?,
            self.schema_id.as_deref().map(SchemaId::parse).transpose()?,
            GroupId::parse(&self.patients_group_id)?,
            email.clone(),
        )?);

        let client = vault.client()?;
        let service = CaseService::new(
            cfg.clone(),
            client.clone(),
            Arc::new(FileCaseStore::new(&cfg)),
            Arc::new(VaultEmailNotifier::new(client, email)),
        );
        let session = service
            .session(AccessToken::new(&self.token)?)
            .await
            .context("could not authenticate with the vault")?;
        tracing::debug!("acting as {} ({})", session.name(), session.role());
        Ok((service, session))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("td=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Policies => {
            let vault_id = cli.vault.vault_id()?;
            let policies = serde_json::json!({
                "admins": admins_policy(&vault_id),
                "doctors": doctors_policy(),
                "patients": patients_policy(),
            });
            println!("{}", serde_json::to_string_pretty(&policies)?);
        }
        Commands::Setup {
            root_token,
            suffix,
            doctors,
            password,
        } => {
            let vault_id = cli.vault.vault_id()?;
            let client = cli.vault.client()?;
            let mut seed = AccountSeed::new(suffix);
            seed.password = password;
            if !doctors.is_empty() {
                seed.doctor_last_names = doctors;
            }

            let account = provision_account(
                client.as_ref(),
                &AccessToken::new(&root_token)?,
                &vault_id,
                &seed,
            )
            .await?;

            // Printed as .env lines so the output can be appended to a deployment's .env.
            println!("TV_CASES_VAULT_ID={vault_id}");
            println!("TV_PATIENTS_GROUP_ID={}", account.patients_group_id);
            println!("TV_ADMINS_GROUP_ID={}", account.admins_group_id);
            println!("TV_DOCTORS_GROUP_ID={}", account.doctors_group_id);
            for user in std::iter::once(&account.admin).chain(&account.doctors) {
                println!("# {} ({})", user.name, user.username);
                println!("#   user id: {}", user.id);
                if let Some(key) = &user.api_key {
                    println!("#   api key: {}", key.expose());
                }
            }
        }
        Commands::SubmitCase {
            workflow,
            approver,
            reviewer,
            case_id,
            patient_name,
            sex,
            dob,
            height,
            weight,
            due_date,
            images,
        } => {
            let (service, session) = workflow.connect(&cli.vault).await?;

            let mut uploads = Vec::with_capacity(images.len());
            for path in &images {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("could not read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".into());
                uploads.push(BlobUpload::new(filename, bytes));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let printer = tokio::spawn(print_progress(rx));
            let record = service
                .submit_case(
                    &session,
                    CaseSubmission {
                        details: CaseDetails {
                            case_id,
                            patient_name,
                            sex,
                            dob,
                            patient_height: height,
                            patient_weight: weight,
                            due_date,
                        },
                        approver_id: UserId::parse(&approver)?,
                        reviewer_id: UserId::parse(&reviewer)?,
                        images: uploads,
                    },
                    Some(tx),
                )
                .await;
            let _ = printer.await;
            let record = record?;
            println!("Created case {} ({})", record.case_doc_id, record.status);
        }
        Commands::Review {
            workflow,
            case_doc_id,
            summary,
            description,
        } => {
            let (service, session) = workflow.connect(&cli.vault).await?;
            let record = service
                .review_case(
                    &session,
                    &DocumentId::parse(&case_doc_id)?,
                    DiagnosisDocument::new(summary, description),
                )
                .await?;
            println!("Reviewed case {} ({})", record.case_doc_id, record.status);
        }
        Commands::Approve {
            workflow,
            case_doc_id,
        } => {
            let (service, session) = workflow.connect(&cli.vault).await?;
            let record = service
                .approve_case(&session, &DocumentId::parse(&case_doc_id)?)
                .await?;
            println!("Approved case {}", record.case_doc_id);
        }
        Commands::Inbox { workflow } => {
            let (service, session) = workflow.connect(&cli.vault).await?;
            let inbox = service.doctor_inbox(&session).await?;
            if inbox.to_review.is_empty() && inbox.to_approve.is_empty() {
                println!("No cases waiting on you.");
            }
            for (heading, entries) in [("To review", &inbox.to_review), ("To approve", &inbox.to_approve)] {
                if entries.is_empty() {
                    continue;
                }
                println!("{heading}:");
                for entry in entries {
                    println!(
                        "  {}  case {}  {}  due {}",
                        entry.record.case_doc_id,
                        entry.case.details.case_id,
                        entry.case.details.patient_name,
                        entry.case.details.due_date
                    );
                }
            }
        }
        Commands::Stats { workflow } => {
            let (service, session) = workflow.connect(&cli.vault).await?;
            let stats = service.dashboard_stats(&session).await?;
            print_stage("Create to review", &stats.create_to_review);
            print_stage("Review to approve", &stats.review_to_approve);
        }
    }

    Ok(())
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<UploadProgress>) {
    while let Some(progress) = rx.recv().await {
        let percent = if progress.bytes_total == 0 {
            100
        } else {
            progress.bytes_loaded * 100 / progress.bytes_total
        };
        eprint!(
            "\rUploading images: {}% ({}/{} bytes)",
            percent, progress.bytes_loaded, progress.bytes_total
        );
    }
    eprintln!();
}

fn print_stage(title: &str, stage: &StageStats) {
    let average = stage
        .avg_response_time
        .map(format_duration)
        .unwrap_or_else(|| "n/a".into());
    println!("{title}: average {average}, {} remaining", stage.cases_remaining);
    for doctor in &stage.response_times {
        let average = doctor
            .avg_response_time
            .map(format_duration)
            .unwrap_or_else(|| "n/a".into());
        println!("  {}  {}", doctor.doctor_user_id, average);
    }
}
