//! batata-http: command-line front end for the Batata HTTP client
//!
//! Registers instances, queries and watches services, and reads, writes and
//! watches configs against a Nacos-compatible server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use batata_http_client::{
    ClientConfig, ConfigParams, ConfigResponse, InstanceParams, NamingEvent, Service,
    ServiceClient,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "batata-http", version, about)]
struct Cli {
    /// Server URL, optionally with credentials and context path
    #[arg(
        short = 's',
        long = "server",
        env = "BATATA_SERVER",
        default_value = "http://127.0.0.1:8848/nacos",
        global = true
    )]
    server: String,

    /// TOML client configuration; overrides --server when given
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[arg(long = "username", env = "BATATA_USERNAME", global = true)]
    username: Option<String>,

    #[arg(long = "password", env = "BATATA_PASSWORD", global = true)]
    password: Option<String>,

    /// Namespace used by every command
    #[arg(short = 'n', long = "namespace", global = true)]
    namespace: Option<String>,

    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: String,

    /// Log every HTTP request and response body at debug level
    #[arg(long = "request-log", global = true)]
    request_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register an instance and keep it alive until Ctrl-C
    Register(RegisterArgs),
    /// Print a service's instances
    Discover(DiscoverArgs),
    /// Print every change of a service until Ctrl-C
    Subscribe(ServiceArgs),
    /// Print a config's content
    GetConfig(ConfigArgs),
    /// Publish a config
    PublishConfig(PublishArgs),
    /// Print every change of a config until Ctrl-C
    ListenConfig(ConfigArgs),
}

#[derive(Debug, Args)]
struct ServiceArgs {
    service: String,

    #[arg(short = 'g', long = "group")]
    group: Option<String>,

    /// Cluster filter, repeatable
    #[arg(long = "cluster")]
    clusters: Vec<String>,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    service: String,

    #[arg(long = "ip")]
    ip: String,

    #[arg(long = "port")]
    port: u16,

    #[arg(short = 'g', long = "group")]
    group: Option<String>,

    #[arg(long = "cluster")]
    cluster: Option<String>,

    #[arg(long = "weight")]
    weight: Option<f64>,

    /// Metadata entry as key=value, repeatable
    #[arg(short = 'm', long = "metadata", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    /// Register a persistent instance (no heartbeats)
    #[arg(long = "persistent")]
    persistent: bool,
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    #[command(flatten)]
    target: ServiceArgs,

    /// Include unhealthy instances
    #[arg(long = "all")]
    all: bool,

    /// Serve from the local cache when fresh enough
    #[arg(long = "lazy")]
    lazy: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    data_id: String,

    #[arg(short = 'g', long = "group", default_value = "DEFAULT_GROUP")]
    group: String,

    #[arg(short = 't', long = "tenant")]
    tenant: Option<String>,
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[command(flatten)]
    target: ConfigArgs,

    /// Inline content
    #[arg(long = "content", conflicts_with = "file")]
    content: Option<String>,

    /// Read content from a file
    #[arg(long = "file")]
    file: Option<PathBuf>,

    /// Content type, e.g. yaml, properties, json
    #[arg(long = "type")]
    config_type: Option<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {}", s))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::new(&cli.server)?,
    };
    if let Some(username) = &cli.username {
        config.username = username.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.default_namespace_id = namespace.clone();
    }
    config.log_level = cli.log_level.clone();
    config.enable_request_log |= cli.request_log;
    config.validate()?;
    Ok(config)
}

fn instance_params(group: &Option<String>, clusters: &[String]) -> InstanceParams {
    let mut params = InstanceParams::new().clusters(clusters.iter());
    if let Some(group) = group {
        params = params.group_name(group);
    }
    params
}

fn config_params(args: &ConfigArgs) -> ConfigParams {
    match &args.tenant {
        Some(tenant) => ConfigParams::new().tenant(tenant),
        None => ConfigParams::new(),
    }
}

fn print_service(service: &Service) {
    println!(
        "{} ({} instances, {} healthy)",
        service.name,
        service.hosts.len(),
        service.healthy_hosts().len()
    );
    for host in &service.hosts {
        println!(
            "  {:<21} cluster={} weight={} healthy={} enabled={}",
            host.address(),
            host.cluster_name,
            host.weight,
            host.healthy,
            host.enabled
        );
    }
}

async fn register(client: &ServiceClient, args: RegisterArgs) -> anyhow::Result<()> {
    let mut params = instance_params(&args.group, &[]).ephemeral(!args.persistent);
    if let Some(cluster) = &args.cluster {
        params = params.cluster_name(cluster);
    }
    if let Some(weight) = args.weight {
        params = params.weight(weight);
    }
    for (key, value) in &args.metadata {
        params = params.metadata(key, value);
    }

    client
        .naming()
        .register_instance(&args.ip, args.port, &args.service, &params)
        .await
        .context("register failed")?;
    tracing::info!(
        "registered {}:{} as {}, Ctrl-C to deregister",
        args.ip,
        args.port,
        args.service
    );

    tokio::signal::ctrl_c().await?;
    client
        .naming()
        .deregister_instance(&args.ip, args.port, &args.service, &params)
        .await
        .context("deregister failed")?;
    tracing::info!("deregistered {}:{}", args.ip, args.port);
    Ok(())
}

async fn discover(client: &ServiceClient, args: DiscoverArgs) -> anyhow::Result<()> {
    let mut params = instance_params(&args.target.group, &args.target.clusters);
    if args.all {
        params = params.healthy(false);
    }
    let service = client
        .naming()
        .get_service(&args.target.service, args.lazy, &params)
        .await?;
    print_service(&service);
    Ok(())
}

async fn subscribe(client: &ServiceClient, args: ServiceArgs) -> anyhow::Result<()> {
    let params = instance_params(&args.group, &args.clusters);
    let listener = Arc::new(|event: NamingEvent| {
        println!(
            "{} [{}] now has {} instances",
            event.service_name,
            event.namespace_id,
            event.instances.len()
        );
        for host in &event.instances {
            println!("  {} healthy={}", host.address(), host.healthy);
        }
    });
    client
        .naming()
        .subscribe(&args.service, &params, listener)
        .await?;
    tracing::info!("subscribed to {}, Ctrl-C to stop", args.service);

    tokio::signal::ctrl_c().await?;
    client.naming().unsubscribe(&args.service, &params);
    Ok(())
}

async fn get_config(client: &ServiceClient, args: ConfigArgs) -> anyhow::Result<()> {
    let content = client
        .config()
        .get_config(&args.data_id, &args.group, &config_params(&args))
        .await?;
    println!("{}", content);
    Ok(())
}

async fn publish_config(client: &ServiceClient, args: PublishArgs) -> anyhow::Result<()> {
    let content = match (&args.content, &args.file) {
        (Some(content), _) => content.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        (None, None) => bail!("either --content or --file is required"),
    };
    let mut params = config_params(&args.target);
    if let Some(config_type) = &args.config_type {
        params = params.config_type(config_type);
    }

    let published = client
        .config()
        .publish_config(&args.target.data_id, &args.target.group, &content, &params)
        .await?;
    if !published {
        bail!("server rejected {}+{}", args.target.data_id, args.target.group);
    }
    println!("published {}+{}", args.target.data_id, args.target.group);
    Ok(())
}

async fn listen_config(client: &ServiceClient, args: ConfigArgs) -> anyhow::Result<()> {
    let listener = Arc::new(|info: ConfigResponse| {
        println!("--- {}+{} changed ---", info.data_id, info.group);
        println!("{}", info.content);
    });
    let mut errors = client.config().listen_config(
        &args.data_id,
        &args.group,
        &config_params(&args),
        listener,
    );
    tracing::info!("listening to {}+{}, Ctrl-C to stop", args.data_id, args.group);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        error = errors.recv() => {
            if let Some(e) = error {
                return Err(e).context("config watch stopped");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = client_config(&cli)?;
    let client = ServiceClient::new(config)
        .await
        .context("failed to start client")?;

    let result = match cli.command {
        Command::Register(args) => register(&client, args).await,
        Command::Discover(args) => discover(&client, args).await,
        Command::Subscribe(args) => subscribe(&client, args).await,
        Command::GetConfig(args) => get_config(&client, args).await,
        Command::PublishConfig(args) => publish_config(&client, args).await,
        Command::ListenConfig(args) => listen_config(&client, args).await,
    };

    client.shutdown();
    result
}
