use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use stockroom_lib::auth::{self, AuthMode, Credentials, SessionStore, SignUpOutcome};
use stockroom_lib::backend::AnyBackend;
use stockroom_lib::config::{BackendKind, Config, Overrides};
use stockroom_lib::inventory::{InventorySettings, InventoryStore};
use stockroom_lib::items::{Item, ItemChanges, ItemDraft};
use stockroom_lib::movements::{Movement, MovementDraft};
use stockroom_lib::notify::ConsoleNotifier;
use stockroom_lib::uploads::SelectedFile;
use anyhow::Context;
use stockroom_lib::{connect_backend, logging, time, AppError, AppResult};

#[derive(Parser)]
#[command(name = "stockroom", about = "Inventory items, images and stock movements")]
struct Cli {
    /// Directory holding config, session, logs and local data
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Backend to use: rest or local
    #[arg(long, value_name = "KIND", global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Sign up, sign in or out
    #[command(subcommand)]
    Auth(AuthCmd),
    /// List and manage inventory items
    #[command(subcommand)]
    Items(ItemsCmd),
    /// Stock movements of an item
    #[command(subcommand)]
    Moves(MovesCmd),
}

#[derive(Args)]
struct CredentialArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Subcommand)]
enum AuthCmd {
    /// Create an account
    SignUp(CredentialArgs),
    /// Sign in and remember the session
    SignIn(CredentialArgs),
    /// Forget the stored session
    SignOut,
    /// Show who is signed in
    Whoami,
}

#[derive(Subcommand)]
enum ItemsCmd {
    /// List items, optionally filtered
    List {
        /// Case-insensitive match on name, description or category
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one item with its movements
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Add an item, uploading any images
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        category: String,
        /// Image file; repeat for several
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
    },
    /// Change some fields of an item
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete an item and the images only it uses
    Delete { id: i64 },
    /// Set where an item is kept
    Locate { id: i64, location: String },
}

#[derive(Subcommand)]
enum MovesCmd {
    /// Movements of an item, oldest first
    List {
        item_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Record a movement
    Add {
        item_id: i64,
        #[arg(long)]
        origin: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        quantity: i64,
    },
}

/// A store failure that a notice has already shown.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Notified(AppError);

trait NotifiedExt<T> {
    fn notified(self) -> anyhow::Result<T>;
}

impl<T> NotifiedExt<T> for AppResult<T> {
    fn notified(self) -> anyhow::Result<T> {
        self.map_err(|err| Notified(err).into())
    }
}

struct App {
    backend: Arc<AnyBackend>,
    sessions: SessionStore,
    settings: InventorySettings,
}

impl App {
    fn store(&self) -> InventoryStore<AnyBackend> {
        InventoryStore::new(
            Arc::clone(&self.backend),
            Arc::new(ConsoleNotifier),
            self.settings.clone(),
        )
    }

    async fn signed_in_store(&self) -> anyhow::Result<InventoryStore<AnyBackend>> {
        auth::require_session(self.backend.as_ref(), &self.sessions).await?;
        Ok(self.store())
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("rendering JSON")?;
    println!("{rendered}");
    Ok(())
}

fn item_line(item: &Item) -> String {
    let mut line = format!(
        "#{} {} x{} [{}]",
        item.id, item.name, item.quantity, item.category
    );
    if let Some(location) = item.location.as_deref().filter(|l| !l.is_empty()) {
        line.push_str(&format!(" @ {location}"));
    }
    if !item.images.is_empty() {
        line.push_str(&format!(" ({} images)", item.images.len()));
    }
    line
}

fn movement_line(movement: &Movement) -> String {
    format!(
        "{}  {} -> {}  x{}",
        time::display_local(&movement.date),
        movement.origin,
        movement.destination,
        movement.quantity
    )
}

async fn run_auth(app: &App, cmd: AuthCmd) -> anyhow::Result<()> {
    match cmd {
        AuthCmd::SignUp(args) => authenticate(app, AuthMode::SignUp, args).await,
        AuthCmd::SignIn(args) => authenticate(app, AuthMode::SignIn, args).await,
        AuthCmd::SignOut => {
            auth::sign_out(app.backend.as_ref(), &app.sessions).await?;
            println!("Signed out.");
            Ok(())
        }
        AuthCmd::Whoami => {
            let session = app
                .sessions
                .snapshot()?
                .ok_or_else(|| AppError::from(auth::SessionError::Missing))?;
            println!(
                "{} ({})",
                session.email().unwrap_or("unknown e-mail"),
                session.user.id
            );
            if session.is_expired() {
                println!("Session expired; it will be refreshed on next use.");
            }
            Ok(())
        }
    }
}

async fn authenticate(app: &App, mode: AuthMode, args: CredentialArgs) -> anyhow::Result<()> {
    let credentials = Credentials::new(args.email, args.password);
    match auth::authenticate(app.backend.as_ref(), &app.sessions, mode, &credentials).await? {
        SignUpOutcome::SignedIn(session) => {
            println!("Signed in as {}.", session.email().unwrap_or(&session.user.id));
        }
        SignUpOutcome::ConfirmationRequired(_) => {
            println!("Check your e-mail to confirm the account, then sign in.");
        }
    }
    Ok(())
}

async fn run_items(app: &App, cmd: ItemsCmd) -> anyhow::Result<()> {
    let mut store = app.signed_in_store().await?;
    match cmd {
        ItemsCmd::List { search, json } => {
            store.fetch_items().await.notified()?;
            if let Some(term) = search {
                store.set_search_term(term);
            }
            let items = store.filtered();
            if json {
                return print_json(&items);
            }
            if items.is_empty() {
                println!("No items.");
            }
            for item in items {
                println!("{}", item_line(item));
            }
            Ok(())
        }
        ItemsCmd::Show { id, json } => {
            let details = store.item_details(id).await?;
            if json {
                return print_json(&details);
            }
            let item = &details.item;
            println!("{}", item_line(item));
            println!("  {}", item.description);
            for url in &item.images {
                println!("  image: {url}");
            }
            if details.movements.is_empty() {
                println!("  no movements");
            }
            for movement in &details.movements {
                println!("  {}", movement_line(movement));
            }
            Ok(())
        }
        ItemsCmd::Add {
            name,
            description,
            quantity,
            category,
            images,
        } => {
            let mut files = Vec::with_capacity(images.len());
            for path in &images {
                let file = SelectedFile::from_path(path)
                    .await
                    .with_context(|| format!("reading image {}", path.display()))?;
                files.push(file);
            }
            store.set_selected_files(files);
            let item = store
                .add_item(ItemDraft {
                    name,
                    description,
                    quantity,
                    category,
                })
                .await
                .notified()?;
            println!("{}", item_line(&item));
            Ok(())
        }
        ItemsCmd::Edit {
            id,
            name,
            description,
            quantity,
            category,
        } => {
            let changes = ItemChanges {
                name,
                description,
                quantity,
                category,
            };
            if changes.is_empty() {
                return Err(AppError::new("CLI/NO_CHANGES", "Nothing to change.").into());
            }
            store.fetch_items().await.notified()?;
            let edit = changes.apply_to(store.open_edit(id)?);
            let item = store.save_item(edit).await.notified()?;
            println!("{}", item_line(&item));
            Ok(())
        }
        ItemsCmd::Delete { id } => {
            store.fetch_items().await.notified()?;
            store.delete_item(id).await.notified()
        }
        ItemsCmd::Locate { id, location } => {
            if !store.update_location(id, &location).await.notified()? {
                println!("Location unchanged.");
            }
            Ok(())
        }
    }
}

async fn run_moves(app: &App, cmd: MovesCmd) -> anyhow::Result<()> {
    let store = app.signed_in_store().await?;
    match cmd {
        MovesCmd::List { item_id, json } => {
            let movements = store.list_movements(item_id).await?;
            if json {
                return print_json(&movements);
            }
            if movements.is_empty() {
                println!("No movements.");
            }
            for movement in &movements {
                println!("{}", movement_line(movement));
            }
            Ok(())
        }
        MovesCmd::Add {
            item_id,
            origin,
            destination,
            quantity,
        } => {
            let draft = MovementDraft {
                origin,
                destination,
                quantity,
            };
            store.record_movement(item_id, &draft).await.notified()?;
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(Overrides {
        data_dir: cli.data_dir,
        backend: cli.backend,
    })
    .context("loading configuration")?;
    let _log_guard =
        logging::init(Some(config.logs_dir().as_path())).context("starting logging")?;

    let backend = Arc::new(
        connect_backend(&config)
            .await
            .context("connecting to the backend")?,
    );
    let app = App {
        backend,
        sessions: SessionStore::file(config.session_path()),
        settings: InventorySettings::from(&config),
    };

    match cli.cmd {
        Cmd::Auth(cmd) => run_auth(&app, cmd).await,
        Cmd::Items(cmd) => run_items(&app, cmd).await,
        Cmd::Moves(cmd) => run_moves(&app, cmd).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast::<Notified>() {
                Ok(Notified(shown)) => shown.log_with_event("command_failed"),
                Err(err) => {
                    eprintln!("Error: {err:#}");
                    AppError::from(err).log_with_event("command_failed");
                }
            }
            ExitCode::FAILURE
        }
    }
}
