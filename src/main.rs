//! Tolino CLI - command line access to the tolino cloud storage space.

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tolino::console::{Console, plural, timestamp};
use tolino::{CloudSession, Config, MetadataUpdate, PartnerRegistry, hardware_id};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// Command line client to access personal tolino cloud storage space.
#[derive(Parser, Debug)]
#[command(name = "tolino")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Username (usually an email address).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Password; prompted for when omitted.
    #[arg(long, global = true)]
    password: Option<String>,

    /// Shop / partner id (use 0 for the list).
    #[arg(long, global = true)]
    partner: Option<u32>,

    /// Log additional debugging info.
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: <config dir>/tolino/config.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and print inventory.
    Inventory,

    /// Upload a file (must be either .pdf or .epub).
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Specify an alternative name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Download a document.
    Download {
        document_id: String,

        /// Directory to write the document to.
        #[arg(long, short, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Delete a document (be careful!).
    Delete { document_id: String },

    /// List devices registered to cloud account.
    Devices,

    /// Unregister device from cloud account (be careful!).
    Unregister { device_id: String },

    /// Set new meta data.
    Meta {
        document_id: String,

        /// New title, e.g. "Book Title 1".
        #[arg(long)]
        title: Option<String>,

        /// New subtitle.
        #[arg(long)]
        subtitle: Option<String>,

        /// New author, e.g. "Hans Muster".
        #[arg(long)]
        author: Option<String>,

        /// New publisher.
        #[arg(long)]
        publisher: Option<String>,

        /// New ISBN, e.g. "977-3-958-39650-2".
        #[arg(long)]
        isbn: Option<String>,

        /// New edition, e.g. "3".
        #[arg(long)]
        edition: Option<String>,

        /// New issued date as dd.mm.yyyy.
        #[arg(long)]
        issued: Option<String>,

        /// New language, e.g. "en".
        #[arg(long)]
        language: Option<String>,
    },

    /// Upload a cover for a specific book.
    Cover {
        document_id: String,

        /// Must be a .png or .jpg.
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },

    /// List available partner ids.
    ListPartners,
}

impl Command {
    /// Whether the command runs with this client registered as a device.
    fn needs_registration(&self) -> bool {
        !matches!(
            self,
            Command::Devices | Command::Unregister { .. } | Command::ListPartners
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    let console = Console::new();

    match run(args, &console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            console.error(&format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "tolino=debug,reqwest=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args, console: &Console) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_logging(args.debug || config.debug);

    let registry = PartnerRegistry::with_custom(config.partners.clone())
        .context("Invalid partner configuration")?;
    let partner_id = args.partner.or(config.account.partner);

    let command = match args.command {
        Some(command) => command,
        None if partner_id == Some(0) => Command::ListPartners,
        None => {
            Args::command().print_help()?;
            bail!("No command given");
        }
    };

    if matches!(command, Command::ListPartners) || partner_id == Some(0) {
        list_partners(&registry, console);
        return Ok(());
    }

    let user = args
        .user
        .or(config.account.user)
        .ok_or_else(|| anyhow!("Login credentials user/password required."))?;
    let password = match args.password.or(config.account.password) {
        Some(password) => password,
        None if std::io::stdin().is_terminal() => dialoguer::Password::new()
            .with_prompt(format!("Password for {}", user))
            .interact()
            .context("Failed to read password")?,
        None => bail!("Login credentials user/password required."),
    };
    let partner_id = partner_id
        .ok_or_else(|| anyhow!("No partner id given (see `tolino list-partners`)"))?;

    let partner = registry.get(partner_id)?;
    let mut session = CloudSession::new(partner, hardware_id(), &config.http)?;
    session.login(&user, &password).await?;

    let outcome = execute(&mut session, command, &registry, console, &user).await;
    let closed = session.close().await;

    match (outcome, closed) {
        (Err(err), Err(close_err)) => {
            warn!("closing session failed: {}", close_err);
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), closed) => closed.map_err(Into::into),
    }
}

async fn execute(
    session: &mut CloudSession<'_>,
    command: Command,
    registry: &PartnerRegistry,
    console: &Console,
    user: &str,
) -> Result<()> {
    if command.needs_registration() {
        session.register().await?;
    }

    match command {
        Command::Inventory => {
            let items = session.inventory().await?;
            console.info(&format!(
                "{} {} stored in tolino cloud account {}",
                console.count(items.len()),
                plural(items.len(), "document"),
                user
            ));
            for item in &items {
                console.record("id", &item.id);
                console.field("title", &item.title);
                console.field("subtitle", &item.subtitle);
                for author in &item.authors {
                    console.field("author", author);
                }
                console.field("mimetype", &item.mime);
                console.field(
                    "type",
                    &format!("{} / {}", item.doc_type, item.storage_area()),
                );
                if let Some(issued) = item.issued {
                    console.field("issued", &timestamp(issued));
                }
                console.field("purchased", &timestamp(item.purchased));
                console.field("partner", &partner_label(registry, item.partner_id));
            }
        }
        Command::Upload { file, name } => {
            let document_id = session.upload(&file, name.as_deref(), None).await?;
            console.success(&format!(
                "uploaded {} to tolino cloud as {}.",
                file.display(),
                document_id
            ));
        }
        Command::Download {
            document_id,
            output,
        } => {
            let path = session.download(output.as_deref(), &document_id).await?;
            console.success(&format!(
                "downloaded {} from tolino cloud to {}.",
                document_id,
                path.display()
            ));
        }
        Command::Delete { document_id } => {
            session.delete(&document_id).await?;
            console.success(&format!("deleted {} from tolino cloud.", document_id));
        }
        Command::Devices => {
            let devices = session.devices().await?;
            console.info(&format!(
                "{} {} connected to tolino cloud account {}",
                console.count(devices.len()),
                plural(devices.len(), "device"),
                user
            ));
            for device in &devices {
                console.record("device", &device.id);
                console.field("type", &device.device_type);
                console.field("name", &device.name);
                console.field("partner", &partner_label(registry, device.partner_id));
                console.field("registered", &timestamp(device.registered));
                console.field("last use", &timestamp(device.last_used));
            }
        }
        Command::Unregister { device_id } => {
            session.unregister(Some(&device_id)).await?;
            console.success(&format!(
                "unregistered device {} from tolino cloud.",
                device_id
            ));
        }
        Command::Meta {
            document_id,
            title,
            subtitle,
            author,
            publisher,
            isbn,
            edition,
            issued,
            language,
        } => {
            let update = MetadataUpdate {
                title,
                subtitle,
                author,
                publisher,
                isbn,
                edition,
                issued,
                language,
            };
            session.metadata(&document_id, &update).await?;
            console.success(&format!("successfully modified book {}", document_id));
        }
        Command::Cover { document_id, image } => {
            session.cover(&document_id, &image).await?;
            console.success(&format!(
                "successfully modified cover for book {}",
                document_id
            ));
        }
        Command::ListPartners => list_partners(registry, console),
    }

    Ok(())
}

fn partner_label(registry: &PartnerRegistry, id: u32) -> String {
    format!("{} / {}", id, registry.name_of(id).unwrap_or("unknown partner"))
}

fn list_partners(registry: &PartnerRegistry, console: &Console) {
    console.section("List of partner ids available:");
    for partner in registry.iter() {
        println!(
            "{:>3} : {} {}",
            partner.id,
            partner.name,
            console.muted(&format!("({})", partner.flow.label()))
        );
        if let Some(url) = &partner.signup_url {
            println!("      {}", console.muted(&format!("sign up: {}", url)));
        }
    }
}
