mod render;

use std::env;
use std::future::Future;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use relay_core::auth::{
    AuthError, FileStorage, PreferencesUpdate, SessionHandle, SessionStore, ThemePreference,
    UserRole,
};
use relay_core::config::ClientConfig;
use relay_core::filters::{FilterController, Route};
use relay_core::gateway::{Gateway, Issue, IssuePriority, IssueType, NewIssue};
use relay_core::notify::{NotificationBus, Subscription};
use relay_core::sync::{
    BulkCoordinator, BulkMode, DisplayedIssue, FieldEdit, IssueListView, OptimisticEditor,
    PollState, PollingScheduler, Visibility,
};
use serde_json::json;
use tokio::sync::watch;
use tokio::{signal, task};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay issue tracker CLI")]
struct Cli {
    /// Override the API base URL (defaults to RELAY_API_URL)
    #[arg(long = "api-url", global = true)]
    api_url: Option<Url>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Session management
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Current user details
    #[command(subcommand)]
    User(UserCommand),
    /// Notification and theme preferences
    #[command(subcommand)]
    Prefs(PrefsCommand),
    /// Issue operations
    #[command(subcommand)]
    Issue(IssueCommand),
    /// Apply one change to many issues
    #[command(subcommand)]
    Bulk(BulkCommand),
    /// Sign-in whitelist administration
    #[command(subcommand)]
    Whitelist(WhitelistCommand),
    /// User role administration
    #[command(subcommand)]
    Users(UsersCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Store and validate a bearer token issued by the identity provider
    Login(LoginArgs),
    /// Forget the stored token
    Logout,
    /// Show whether the stored token is still accepted
    Status,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Token to store; prompted for when omitted
    #[arg(long)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Show the signed-in user
    Me(JsonArgs),
}

#[derive(Args, Debug)]
struct JsonArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum PrefsCommand {
    /// Update server-side preferences
    Set(PrefsSetArgs),
    /// Theme used while signed out
    LocalTheme {
        theme: ThemePreference,
    },
}

#[derive(Args, Debug)]
struct PrefsSetArgs {
    #[arg(long)]
    theme: Option<ThemePreference>,
    #[arg(long = "email-notifications")]
    email_notifications: Option<bool>,
    #[arg(long = "discord-notifications")]
    discord_notifications: Option<bool>,
}

#[derive(Subcommand, Debug)]
enum IssueCommand {
    /// List issues matching filters
    List(IssueListArgs),
    /// View a single issue by key (e.g. BUG-123)
    View(IssueViewArgs),
    /// Create a new issue
    Create(IssueCreateArgs),
    /// Change the status of an issue
    SetStatus { key: String, status: String },
    /// Change the priority of an issue
    SetPriority { key: String, priority: IssuePriority },
    /// Change the type of an issue
    SetType { key: String, issue_type: IssueType },
    /// Replace the summary of an issue
    Rename { key: String, summary: String },
    /// Add a comment to an issue
    Comment { key: String, body: String },
    /// Issues updated after a timestamp
    Updates(IssueUpdatesArgs),
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Start from a shared list query (e.g. "status=Open&page=2")
    #[arg(long)]
    query: Option<String>,
    /// Filter by status (repeatable or comma separated)
    #[arg(long, value_delimiter = ',')]
    status: Vec<String>,
    /// Filter by priority
    #[arg(long, value_delimiter = ',')]
    priority: Vec<IssuePriority>,
    /// Filter by issue type
    #[arg(long = "type", value_delimiter = ',')]
    issue_type: Vec<IssueType>,
    /// Free-text search
    #[arg(long)]
    search: Option<String>,
    /// Page number (1-based)
    #[arg(long)]
    page: Option<u32>,
}

#[derive(Args, Debug)]
struct IssueListArgs {
    #[command(flatten)]
    filters: FilterArgs,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct IssueViewArgs {
    /// Issue key (e.g. BUG-123)
    key: String,
    /// Keep polling and re-render on change until interrupted
    #[arg(long)]
    watch: bool,
    /// Output raw JSON
    #[arg(long, conflicts_with = "watch")]
    json: bool,
}

#[derive(Args, Debug)]
struct IssueCreateArgs {
    #[arg(long)]
    summary: String,
    /// At least 10 characters
    #[arg(long)]
    details: String,
    #[arg(long = "type", default_value = "Bug")]
    issue_type: IssueType,
    #[arg(long, default_value = "Medium")]
    priority: IssuePriority,
    /// Links to screenshots or recordings
    #[arg(long)]
    attachments: Option<String>,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct IssueUpdatesArgs {
    /// ISO-8601 timestamp
    #[arg(long)]
    since: String,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum BulkCommand {
    /// Move several issues to one status
    Status(BulkStatusArgs),
}

#[derive(Args, Debug)]
struct BulkStatusArgs {
    /// Target status
    #[arg(long)]
    status: String,
    /// Issue keys
    #[arg(required = true)]
    keys: Vec<String>,
    /// Use the server's batched endpoint instead of one request per issue
    #[arg(long)]
    batched: bool,
    /// List query used for the reload afterwards
    #[arg(long)]
    query: Option<String>,
}

#[derive(Subcommand, Debug)]
enum WhitelistCommand {
    /// List whitelisted emails
    List(JsonArgs),
    /// Allow an email to sign in
    Add {
        email: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove a whitelist entry by id
    Remove { id: i64 },
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    /// List registered users
    List(JsonArgs),
    /// Change a user's role
    SetRole { user_id: String, role: UserRole },
}

/// Everything a command needs once the session has been restored.
struct App {
    store: SessionStore,
    bus: NotificationBus,
    config: ClientConfig,
    _toasts: Subscription,
}

impl App {
    async fn connect(api_url: Option<Url>) -> Result<Self> {
        let mut config = ClientConfig::from_env().context("invalid client configuration")?;
        if let Some(url) = api_url {
            config.api_url = url;
        }

        let storage =
            FileStorage::with_default_locator().context("unable to initialise client storage")?;
        let session = SessionHandle::new(storage);
        let gateway = Gateway::new(config.api_url.clone(), session)
            .context("failed to build HTTP gateway")?;
        let store = SessionStore::new(gateway);
        let restored = store.initialize().await;
        tracing::debug!(
            api = %config.api_url,
            authenticated = restored.is_authenticated(),
            "session restored"
        );

        let bus = NotificationBus::new();
        let toasts = bus.subscribe(render::print_toast, |_| {});

        Ok(Self {
            store,
            bus,
            config,
            _toasts: toasts,
        })
    }

    fn gateway(&self) -> &Gateway {
        self.store.gateway()
    }

    fn session(&self) -> &SessionHandle {
        self.store.session()
    }

    fn require_session(&self) -> Result<()> {
        if self.store.is_authenticated() {
            Ok(())
        } else {
            Err(anyhow!("not signed in; run `relay auth login`"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let app = App::connect(cli.api_url).await?;

    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Login(args) => auth_login(&app, args).await?,
            AuthCommand::Logout => auth_logout(&app).await?,
            AuthCommand::Status => auth_status(&app),
        },
        Commands::User(cmd) => match cmd {
            UserCommand::Me(args) => user_me(&app, args).await?,
        },
        Commands::Prefs(cmd) => match cmd {
            PrefsCommand::Set(args) => prefs_set(&app, args).await?,
            PrefsCommand::LocalTheme { theme } => prefs_local_theme(&app, theme)?,
        },
        Commands::Issue(cmd) => match cmd {
            IssueCommand::List(args) => issue_list(&app, args).await?,
            IssueCommand::View(args) => issue_view(&app, args).await?,
            IssueCommand::Create(args) => issue_create(&app, args).await?,
            IssueCommand::SetStatus { key, status } => {
                issue_edit(&app, &key, FieldEdit::Status(status)).await?
            }
            IssueCommand::SetPriority { key, priority } => {
                issue_edit(&app, &key, FieldEdit::Priority(priority)).await?
            }
            IssueCommand::SetType { key, issue_type } => {
                issue_edit(&app, &key, FieldEdit::Type(issue_type)).await?
            }
            IssueCommand::Rename { key, summary } => {
                issue_edit(&app, &key, FieldEdit::Summary(summary)).await?
            }
            IssueCommand::Comment { key, body } => issue_comment(&app, &key, &body).await?,
            IssueCommand::Updates(args) => issue_updates(&app, args).await?,
        },
        Commands::Bulk(cmd) => match cmd {
            BulkCommand::Status(args) => bulk_status(&app, args).await?,
        },
        Commands::Whitelist(cmd) => match cmd {
            WhitelistCommand::List(args) => whitelist_list(&app, args).await?,
            WhitelistCommand::Add { email, notes } => {
                whitelist_add(&app, &email, notes.as_deref()).await?
            }
            WhitelistCommand::Remove { id } => whitelist_remove(&app, id).await?,
        },
        Commands::Users(cmd) => match cmd {
            UsersCommand::List(args) => users_list(&app, args).await?,
            UsersCommand::SetRole { user_id, role } => users_set_role(&app, &user_id, role).await?,
        },
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RELAY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "relay=debug,relay_core=debug,info"
        } else {
            "relay=info,relay_core=info,warn"
        })
    });

    let format = env::var("RELAY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn auth_login(app: &App, args: LoginArgs) -> Result<()> {
    let token = match args.token {
        Some(token) => token,
        None => prompt_for_token().await?,
    };
    match app.store.sign_in(&token).await {
        Ok(user) => {
            println!("Signed in as {} ({})", user.display_name(), user.role);
            Ok(())
        }
        Err(AuthError::EmptyCredential) => bail!("no token provided"),
        Err(err) => Err(err).context("sign-in failed"),
    }
}

async fn prompt_for_token() -> Result<String> {
    task::spawn_blocking(|| {
        use std::io::{self, Write};
        print!("Paste the bearer token: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok::<_, io::Error>(input.trim().to_owned())
    })
    .await
    .context("token prompt was cancelled")?
    .context("failed to read token")
}

async fn auth_logout(app: &App) -> Result<()> {
    app.store.sign_out().await;
    println!("Signed out.");
    Ok(())
}

fn auth_status(app: &App) {
    match app.session().user() {
        Some(user) => {
            println!("Signed in as {} <{}>", user.display_name(), user.email);
            println!("Role      : {}", user.role);
        }
        None => println!("Not signed in."),
    }
    println!("API       : {}", app.config.api_url);
    println!("Theme     : {:?}", app.session().effective_theme());
}

async fn user_me(app: &App, args: JsonArgs) -> Result<()> {
    app.require_session()?;
    let user = app.store.refresh_user().await.context("identity check failed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        render::render_user(&user);
    }
    Ok(())
}

async fn prefs_set(app: &App, args: PrefsSetArgs) -> Result<()> {
    app.require_session()?;
    let update = PreferencesUpdate {
        email_notifications: args.email_notifications,
        discord_notifications: args.discord_notifications,
        theme: args.theme,
    };
    if update.is_empty() {
        bail!("nothing to update; pass --theme or a notification flag");
    }
    let prefs = app
        .store
        .update_preferences(&update)
        .await
        .context("failed to update preferences")?;
    println!("{}", serde_json::to_string_pretty(&prefs)?);
    Ok(())
}

fn prefs_local_theme(app: &App, theme: ThemePreference) -> Result<()> {
    app.store
        .set_local_theme(theme)
        .context("failed to store theme")?;
    println!("Signed-out theme set to {theme}.");
    Ok(())
}

/// Accepts a bare query, `?query` or a full `/issues?query` location.
fn filters_from_query(query: Option<&str>) -> FilterController {
    let query = query
        .map(str::trim)
        .map(|q| q.split_once('?').map_or(q, |(_, rest)| rest))
        .unwrap_or_default();
    let path = Route::IssueList.path();
    if query.is_empty() {
        FilterController::from_location(&path)
    } else {
        FilterController::from_location(&format!("{path}?{query}"))
    }
}

fn build_filters(args: &FilterArgs) -> FilterController {
    let mut filters = filters_from_query(args.query.as_deref());
    if !args.status.is_empty() {
        filters.set_statuses(&args.status);
    }
    if !args.priority.is_empty() {
        filters.set_priorities(args.priority.iter().copied());
    }
    if !args.issue_type.is_empty() {
        filters.set_types(args.issue_type.iter().copied());
    }
    if let Some(search) = &args.search {
        filters.set_search(search.clone());
    }
    if let Some(page) = args.page {
        filters.set_page(page);
    }
    filters
}

async fn issue_list(app: &App, args: IssueListArgs) -> Result<()> {
    app.require_session()?;
    let filters = build_filters(&args.filters);
    let mut view = IssueListView::with_page_size(filters, app.config.page_size);
    let page = view
        .reload(app.gateway())
        .await
        .context("failed to load issues")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(page)?);
    } else {
        render::render_issue_list(page);
        eprintln!("Shareable location: {}", view.filters().address().current());
    }
    Ok(())
}

async fn issue_view(app: &App, args: IssueViewArgs) -> Result<()> {
    app.require_session()?;
    let issue = app
        .gateway()
        .get_issue(&args.key)
        .await
        .with_context(|| format!("failed to load {}", args.key))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
        return Ok(());
    }
    render::render_issue_detail(&issue);
    if !args.watch {
        return Ok(());
    }

    let key = issue.key.clone();
    let displayed = DisplayedIssue::with_issue(issue);
    let changes = displayed.subscribe();

    let (_visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
    let poller = PollingScheduler::new(app.config.poll_interval).spawn_for_issue(
        app.gateway().clone(),
        key,
        displayed.clone(),
        visibility_rx,
    );
    eprintln!(
        "Watching; refreshing every {}s. Press Ctrl-C to stop.",
        app.config.poll_interval.as_secs()
    );

    let shutdown = async {
        let _ = signal::ctrl_c().await;
    };
    let exit = follow_issue(changes, poller.subscribe(), shutdown, |issue| {
        println!();
        render::render_issue_detail(issue);
    })
    .await;
    poller.teardown();

    match exit {
        WatchExit::Interrupted | WatchExit::SourceClosed => Ok(()),
        WatchExit::PollingStopped if app.store.is_authenticated() => {
            bail!("polling stopped unexpectedly")
        }
        WatchExit::PollingStopped => bail!("session expired; run `relay auth login`"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchExit {
    Interrupted,
    PollingStopped,
    SourceClosed,
}

/// Render every new version of the issue until interrupted or the poller gives up.
async fn follow_issue<S, F>(
    mut changes: watch::Receiver<Option<Issue>>,
    mut poll_state: watch::Receiver<PollState>,
    shutdown: S,
    mut on_change: F,
) -> WatchExit
where
    S: Future<Output = ()>,
    F: FnMut(&Issue),
{
    tokio::pin!(shutdown);
    loop {
        if *poll_state.borrow_and_update() == PollState::Stopped {
            return WatchExit::PollingStopped;
        }
        tokio::select! {
            _ = &mut shutdown => return WatchExit::Interrupted,
            changed = poll_state.changed() => {
                if changed.is_err() {
                    return WatchExit::PollingStopped;
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return WatchExit::SourceClosed;
                }
                let latest = changes.borrow_and_update().clone();
                if let Some(issue) = latest {
                    on_change(&issue);
                }
            }
        }
    }
}

async fn issue_create(app: &App, args: IssueCreateArgs) -> Result<()> {
    app.require_session()?;
    let created = app
        .gateway()
        .create_issue(NewIssue {
            summary: args.summary,
            details: args.details,
            issue_type: args.issue_type,
            priority: args.priority,
            attachment_links: args.attachments,
        })
        .await
        .context("failed to create issue")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "key": created.key, "self": created.self_url }))?
        );
    } else {
        println!("Created {}", created.key);
    }
    Ok(())
}

async fn issue_edit(app: &App, key: &str, edit: FieldEdit) -> Result<()> {
    app.require_session()?;
    let issue = app
        .gateway()
        .get_issue(key)
        .await
        .with_context(|| format!("failed to load {key}"))?;
    let displayed = DisplayedIssue::with_issue(issue);
    let editor = OptimisticEditor::new(app.gateway().clone(), app.bus.clone());
    let field = edit.field_name();

    editor
        .apply(&displayed, edit)
        .await
        .with_context(|| format!("failed to update {field} of {key}"))?;

    if let Some(issue) = displayed.snapshot() {
        render::render_issue_summary(&issue);
    }
    Ok(())
}

async fn issue_comment(app: &App, key: &str, body: &str) -> Result<()> {
    app.require_session()?;
    let comment = app
        .gateway()
        .add_comment(key, body)
        .await
        .with_context(|| format!("failed to comment on {key}"))?;
    println!("Added comment {} to {key}", comment.id);
    Ok(())
}

async fn issue_updates(app: &App, args: IssueUpdatesArgs) -> Result<()> {
    app.require_session()?;
    let updates = app
        .gateway()
        .issues_updated_since(&args.since)
        .await
        .context("failed to fetch updates")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&updates.issues)?);
    } else {
        println!("{} issue(s) updated since {}", updates.count, args.since);
        for issue in &updates.issues {
            render::render_issue_summary(issue);
        }
    }
    Ok(())
}

async fn bulk_status(app: &App, args: BulkStatusArgs) -> Result<()> {
    app.require_session()?;
    let mode = if args.batched {
        BulkMode::Batched
    } else {
        BulkMode::PerItem
    };
    let coordinator = BulkCoordinator::new(app.gateway().clone(), app.bus.clone()).with_mode(mode);

    let mut view =
        IssueListView::with_page_size(filters_from_query(args.query.as_deref()), app.config.page_size);
    for key in &args.keys {
        view.selection.select(key.trim());
    }
    view.enforce_capability(app.session());

    let outcome = coordinator
        .apply_to_view(&mut view, &args.status)
        .await
        .context("bulk update was not started")?;

    for key in &outcome.failed {
        eprintln!("  failed: {key}");
    }
    if let Some(page) = view.page() {
        render::render_issue_list(page);
    }
    if outcome.updated == 0 {
        bail!("no issues were updated");
    }
    Ok(())
}

async fn whitelist_list(app: &App, args: JsonArgs) -> Result<()> {
    app.require_session()?;
    let entries = app
        .gateway()
        .list_whitelist()
        .await
        .context("failed to load whitelist")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        render::render_whitelist(&entries);
    }
    Ok(())
}

async fn whitelist_add(app: &App, email: &str, notes: Option<&str>) -> Result<()> {
    app.require_session()?;
    let entry = app
        .gateway()
        .add_whitelist(email, notes)
        .await
        .context("failed to add email")?;
    println!("Whitelisted {} (id {})", entry.email, entry.id);
    Ok(())
}

async fn whitelist_remove(app: &App, id: i64) -> Result<()> {
    app.require_session()?;
    app.gateway()
        .remove_whitelist(id)
        .await
        .with_context(|| format!("failed to remove whitelist entry {id}"))?;
    println!("Removed whitelist entry {id}");
    Ok(())
}

async fn users_list(app: &App, args: JsonArgs) -> Result<()> {
    app.require_session()?;
    let users = app
        .gateway()
        .list_users()
        .await
        .context("failed to load users")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else {
        render::render_users(&users);
    }
    Ok(())
}

async fn users_set_role(app: &App, user_id: &str, role: UserRole) -> Result<()> {
    app.require_session()?;
    let change = app
        .gateway()
        .update_user_role(user_id, role)
        .await
        .with_context(|| format!("failed to change role of {user_id}"))?;
    println!("{} is now {}", change.user_id, change.role);
    Ok(())
}
