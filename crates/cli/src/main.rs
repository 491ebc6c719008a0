use clap::{Parser, Subcommand};
use nupat::api::{HttpGateway, Role};
use nupat::auth::{AuthClient, Credentials};
use nupat::history::LocalHistoryStore;
use nupat::session::{ActiveChat, SessionReconciler};
use nupat::storage::FileStorage;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nupat")]
#[command(about = "Nupat chat client", long_about = None)]
struct Cli {
    /// Config file path (default: NUPAT_CONFIG_PATH or ~/.nupat/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and the data directory.
    Init,

    /// Create an account and store its session token.
    Signup {
        #[arg(long)]
        email: String,

        /// Optional phone number.
        #[arg(long)]
        phone: Option<String>,

        /// Password (at least 8 characters). Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in and store the session token.
    Login {
        #[arg(long)]
        email: String,

        /// Password. Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Log out and forget the stored session token.
    Logout,

    /// Show the logged-in user.
    Whoami,

    /// List chats (from the backend, or the local history with --local).
    Chats {
        /// Only show the locally cached history; no network access.
        #[arg(long)]
        local: bool,
    },

    /// Chat interactively. Loads your chats and opens the most recent one unless --chat is given.
    Chat {
        /// Chat id to open.
        #[arg(long, value_name = "ID")]
        chat: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("nupat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config),
        Some(Commands::Signup {
            email,
            phone,
            password,
        }) => run_signup(config, email, phone, password).await,
        Some(Commands::Login { email, password }) => run_login(config, email, password).await,
        Some(Commands::Logout) => run_logout(config).await,
        Some(Commands::Whoami) => run_whoami(config).await,
        Some(Commands::Chats { local }) => run_chats(config, local).await,
        Some(Commands::Chat { chat }) => run_chat(config, chat).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

/// Config, storage and gateway shared by every subcommand.
struct Client {
    storage: Arc<FileStorage>,
    gateway: Arc<HttpGateway>,
}

impl Client {
    fn open(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (config, path) = nupat::config::load_config(config_path)?;
        let data_dir = nupat::config::resolve_data_dir(&config, &path);
        let gateway = HttpGateway::from_config(&config)?;
        log::debug!(
            "using backend {} and data directory {}",
            gateway.base_url(),
            data_dir.display()
        );
        Ok(Self {
            storage: Arc::new(FileStorage::new(data_dir)),
            gateway: Arc::new(gateway),
        })
    }

    fn credentials(&self) -> Credentials {
        Credentials::new(self.storage.clone())
    }

    fn auth(&self) -> AuthClient {
        AuthClient::new(self.gateway.clone(), self.credentials())
    }

    fn reconciler(&self) -> SessionReconciler {
        SessionReconciler::new(
            self.gateway.clone(),
            LocalHistoryStore::new(self.storage.clone()),
            self.credentials().token(),
        )
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(nupat::config::default_config_path);
    let data_dir = nupat::init::init_config_dir(&path)?;
    println!(
        "initialized configuration at {} (data in {})",
        path.parent().unwrap_or(std::path::Path::new(".")).display(),
        data_dir.display()
    );
    Ok(())
}

fn prompt_password(password: Option<String>) -> anyhow::Result<String> {
    if let Some(p) = password {
        return Ok(p);
    }
    let mut stdout = io::stdout();
    write!(stdout, "password: ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

async fn run_signup(
    config_path: Option<PathBuf>,
    email: String,
    phone: Option<String>,
    password: Option<String>,
) -> anyhow::Result<()> {
    let client = Client::open(config_path)?;
    let password = prompt_password(password)?;
    client
        .auth()
        .signup(&email, phone.as_deref(), &password)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("account created; you are logged in as {}", email.trim());
    Ok(())
}

async fn run_login(
    config_path: Option<PathBuf>,
    email: String,
    password: Option<String>,
) -> anyhow::Result<()> {
    let client = Client::open(config_path)?;
    let password = prompt_password(password)?;
    client
        .auth()
        .login(&email, &password)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("logged in as {}", email.trim());
    Ok(())
}

async fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = Client::open(config_path)?;
    client
        .auth()
        .logout()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("logged out");
    Ok(())
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = Client::open(config_path)?;
    let user = client
        .auth()
        .current_user()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

async fn run_chats(config_path: Option<PathBuf>, local: bool) -> anyhow::Result<()> {
    let client = Client::open(config_path)?;
    let reconciler = client.reconciler();
    if !local {
        if let Err(e) = reconciler.refresh_history().await {
            eprintln!("could not refresh chats ({}); showing local history", e);
        }
    }
    print_history(&reconciler).await;
    Ok(())
}

async fn print_history(reconciler: &SessionReconciler) {
    let snapshot = reconciler.snapshot().await;
    if snapshot.history.is_empty() {
        println!("(no chats)");
        return;
    }
    let active = snapshot.active.as_ref().map(|a| a.id().to_string());
    for (i, chat) in snapshot.history.iter().enumerate() {
        let marker = if active.as_deref() == Some(chat.id.as_str()) {
            "*"
        } else {
            " "
        };
        let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(chat.ts)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{}{:>3}. {}  {}  [{}]", marker, i + 1, chat.title, when, chat.id);
    }
}

fn print_messages(chat: &ActiveChat) {
    println!("-- {} [{}]", chat.summary.title, chat.summary.id);
    for m in &chat.messages {
        let prefix = match m.role {
            Role::User => ">",
            Role::Assistant => "<",
        };
        println!("{} {}", prefix, m.content.trim());
    }
}

/// Resolve `/open` arguments: a 1-based index into the history list or a chat id.
async fn resolve_chat_ref(reconciler: &SessionReconciler, arg: &str) -> String {
    if let Ok(n) = arg.parse::<usize>() {
        let history = reconciler.history().await;
        if n >= 1 && n <= history.len() && history.iter().all(|c| c.id != arg) {
            return history[n - 1].id.clone();
        }
    }
    arg.to_string()
}

const CHAT_HELP: &str = "commands: /new [title], /chats, /open <n|id>, /rename <title>, /delete [n|id], /show, /retry, /exit";

async fn run_chat(config_path: Option<PathBuf>, chat: Option<String>) -> anyhow::Result<()> {
    let client = Client::open(config_path)?;
    let reconciler = client.reconciler();
    if !reconciler.is_authenticated() {
        anyhow::bail!("not logged in; run `nupat login` first");
    }

    match chat {
        Some(id) => {
            if let Err(e) = reconciler.refresh_history().await {
                eprintln!("could not refresh chats: {}", e);
            }
            let id = resolve_chat_ref(&reconciler, &id).await;
            if let Err(e) = reconciler.select_chat(&id).await {
                eprintln!("could not open chat {}: {}", id, e);
            }
        }
        None => {
            if let Err(e) = reconciler.initialize().await {
                eprintln!("could not load chats: {}", e);
            }
        }
    }
    if let Some(active) = reconciler.active().await {
        print_messages(&active);
    }
    println!("{}", CHAT_HELP);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (cmd, arg) = match input.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (input, ""),
        };
        match cmd.to_ascii_lowercase().as_str() {
            "/exit" | "/quit" => break,
            "/help" => println!("{}", CHAT_HELP),
            "/new" => {
                let title = Some(arg).filter(|a| !a.is_empty());
                match reconciler.create_chat(title).await {
                    Ok(summary) => println!("-- {} [{}]", summary.title, summary.id),
                    Err(e) => eprintln!("could not create chat: {}", e),
                }
            }
            "/chats" => print_history(&reconciler).await,
            "/open" if !arg.is_empty() => {
                let id = resolve_chat_ref(&reconciler, arg).await;
                if let Err(e) = reconciler.select_chat(&id).await {
                    eprintln!("could not load messages: {}", e);
                }
                if let Some(active) = reconciler.active().await {
                    print_messages(&active);
                }
            }
            "/rename" if !arg.is_empty() => {
                let Some(active) = reconciler.active().await else {
                    eprintln!("no chat open");
                    continue;
                };
                match reconciler.rename_chat(active.id(), arg).await {
                    Ok(summary) => println!("renamed to {}", summary.title),
                    Err(e) => eprintln!("could not rename chat: {}", e),
                }
            }
            "/delete" => {
                let id = if arg.is_empty() {
                    match reconciler.active().await {
                        Some(active) => active.id().to_string(),
                        None => {
                            eprintln!("no chat open");
                            continue;
                        }
                    }
                } else {
                    resolve_chat_ref(&reconciler, arg).await
                };
                match reconciler.delete_chat(&id).await {
                    Ok(()) => println!("deleted {}", id),
                    Err(e) => eprintln!("could not delete chat: {}", e),
                }
            }
            "/retry" => {
                let draft = reconciler.snapshot().await.draft;
                if draft.trim().is_empty() {
                    println!("nothing to retry");
                    continue;
                }
                send_and_print(&reconciler, &draft).await;
            }
            "/show" => match reconciler.active().await {
                Some(active) => print_messages(&active),
                None => println!("no chat open"),
            },
            c if c.starts_with('/') => eprintln!("unknown command; {}", CHAT_HELP),
            _ => send_and_print(&reconciler, input).await,
        }
    }

    Ok(())
}

async fn send_and_print(reconciler: &SessionReconciler, text: &str) {
    match reconciler.send_message(text).await {
        Ok(Some(exchange)) => println!("< {}", exchange.assistant.content.trim()),
        Ok(None) => {}
        Err(e) => eprintln!("send failed, message kept as draft (/retry to resend): {}", e),
    }
}
