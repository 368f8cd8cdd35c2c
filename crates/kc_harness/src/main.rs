//! kc-harness: start, provision, and tear down a Keycloak test node.

use clap::{Parser, Subcommand};
use kc_harness::settings::DEFAULT_AT_LIFESPAN_S;
use kc_harness::ConfigValue;
use kc_harness_logging::{init_logging, LogConfig};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

use cli::{NodeArgs, UserSpec};

#[derive(Parser, Debug)]
#[command(name = "kc-harness", about = "Run and provision a Keycloak test node")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(flatten)]
    node: NodeArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configure and launch Keycloak, then create the realm
    Start {
        /// Access token lifespan of the realm, in seconds
        #[arg(long, default_value_t = DEFAULT_AT_LIFESPAN_S)]
        token_lifespan: u64,

        /// Extra keycloak.conf option as key=value (empty value removes the key)
        #[arg(long = "set", value_parser = cli::parse_override)]
        overrides: Vec<(String, Option<ConfigValue>)>,

        /// Client to create (with a generated secret); repeatable
        #[arg(long = "client")]
        clients: Vec<String>,

        /// User to create as name:password[:admin]; repeatable
        #[arg(long = "user", value_parser = cli::parse_user)]
        users: Vec<UserSpec>,
    },

    /// Stop the Keycloak process
    Stop {
        /// Send KILL instead of TERM
        #[arg(long)]
        force: bool,
    },

    /// Stop Keycloak if running and remove its log, data, and config
    Clean,

    /// Show whether Keycloak is running
    Status,

    /// Print the realm's OpenID discovery URL
    DiscoveryUrl,

    /// Create a client in the realm
    CreateClient {
        client_id: String,

        /// Also generate a client secret
        #[arg(long)]
        generate_secret: bool,
    },

    /// Create a user in the realm
    CreateUser {
        username: String,
        password: String,

        /// Grant the realm-admin role
        #[arg(long)]
        realm_admin: bool,
    },

    /// Update fields of an existing user
    UpdateUser {
        username: String,

        /// Field to set as key=value (value parsed as JSON when possible); repeatable
        #[arg(long = "field", value_parser = cli::parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Print the OAuth client configuration for a client as JSON
    OauthConfig { client_id: String },

    /// Copy the Keycloak log to a local directory
    CollectLogs { dest: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "kc-harness",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialise logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let node = &cli.node;
    match cli.command {
        Commands::Start {
            token_lifespan,
            overrides,
            clients,
            users,
        } => cli::run_start(node, token_lifespan, overrides, &clients, &users),
        Commands::Stop { force } => cli::run_stop(node, !force),
        Commands::Clean => cli::run_clean(node),
        Commands::Status => cli::run_status(node),
        Commands::DiscoveryUrl => cli::run_discovery_url(node),
        Commands::CreateClient {
            client_id,
            generate_secret,
        } => cli::run_create_client(node, &client_id, generate_secret),
        Commands::CreateUser {
            username,
            password,
            realm_admin,
        } => cli::run_create_user(node, &username, &password, realm_admin),
        Commands::UpdateUser { username, fields } => cli::run_update_user(node, &username, fields),
        Commands::OauthConfig { client_id } => cli::run_oauth_config(node, &client_id),
        Commands::CollectLogs { dest } => cli::run_collect_logs(node, &dest),
    }
}
