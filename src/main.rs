use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use snapcard::api;
use snapcard::assets::AssetLoader;
use snapcard::models::{AppConfig, RenderOptions};
use snapcard::rendering::{encode, SvgEngine};
use snapcard::server;
use snapcard::services::{FileWatcher, PoolStats};

#[derive(Parser)]
#[command(name = "snapcard")]
#[command(about = "Render templated SVG cards to PNG through a pool of reusable sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Start the HTTP server with dev mode (template reload on change)
    Dev {
        /// Compile templates on every render instead of caching them
        #[arg(long)]
        no_cache: bool,
    },
    /// Render a template directly to a PNG file
    Render {
        /// Template identifier (e.g. "echo", "board")
        #[arg(short, long)]
        template: String,

        /// JSON file with the data record ("-" reads stdin); empty record if omitted
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Output PNG file path
        #[arg(short, long)]
        output: PathBuf,

        /// Viewport width in CSS pixels
        #[arg(short, long)]
        width: Option<u32>,

        /// Recompress the PNG with oxipng
        #[arg(long)]
        optimize: bool,
    },
    /// List available templates
    Templates,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Snapcard API",
        description = "Render templated SVG cards to PNG",
        version = "0.3.0",
        license(name = "MIT")
    ),
    paths(
        api::handle_render,
        api::handle_list_templates,
        api::handle_clear_templates,
        api::handle_pool_stats,
    ),
    components(schemas(
        api::TemplateInfo,
        api::TemplateListResponse,
        api::CacheClearResponse,
        PoolStats,
    )),
    tags(
        (name = "Render", description = "Template rendering"),
        (name = "Templates", description = "Template listing and cache control"),
        (name = "Pool", description = "Rendering session pool")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Render {
            template,
            data,
            output,
            width,
            optimize,
        }) => run_render_command(&template, data.as_deref(), &output, width, optimize).await,
        Some(Commands::Templates) => {
            run_templates_command();
            Ok(())
        }
        Some(Commands::Serve) => run_server().await,
        Some(Commands::Dev { no_cache }) => run_dev_server(no_cache).await,
        None => {
            run_status_command();
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str, with_time: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    if with_time {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();
    }
}

/// Render a template directly to a PNG file (no server needed)
async fn run_render_command(
    template: &str,
    data: Option<&Path>,
    output: &Path,
    width: Option<u32>,
    optimize: bool,
) -> anyhow::Result<()> {
    // Minimal logging for CLI
    init_tracing("snapcard=warn", false);

    let data: serde_json::Value = match data {
        Some(path) if path == Path::new("-") => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            serde_json::from_str(&raw)?
        }
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::Value::Null,
    };

    let asset_loader = Arc::new(AssetLoader::from_env());
    let config = AppConfig::load_from_assets(&asset_loader);
    let engine = SvgEngine::from_config(&config.engine, asset_loader.get_fonts()).await;
    let state = server::create_app_state_with_engine(asset_loader, &config, Arc::new(engine))?;

    let result = state
        .pipeline
        .render(template, data, RenderOptions { width })
        .await;
    state.pool.shutdown().await;
    let bitmap = result.map_err(|e| anyhow::anyhow!("Render error: {e}"))?;

    let png_bytes = if optimize {
        tokio::task::spawn_blocking(move || encode::optimize(bitmap.png)).await?
    } else {
        bitmap.png
    };

    std::fs::write(output, &png_bytes)?;
    println!(
        "Rendered {} ({}x{}, {} bytes)",
        output.display(),
        bitmap.width,
        bitmap.height,
        png_bytes.len()
    );

    Ok(())
}

/// Print the known templates with their contracts
fn run_templates_command() {
    let loader = AssetLoader::from_env();
    let config = AppConfig::load_from_assets(&loader);

    for name in loader.list_template_identifiers() {
        match config.contract(&name) {
            Some(contract) => {
                let description = contract.description.as_deref().unwrap_or("");
                println!("{name:<12} {description}");
                if !contract.required.is_empty() {
                    println!("{:<12}   requires: {}", "", contract.required.join(", "));
                }
                if let Some(width) = contract.width {
                    println!("{:<12}   width:    {width}px", "");
                }
            }
            None => println!("{name}"),
        }
    }
}

/// Display status and configuration information
fn run_status_command() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let bind_addr = std::env::var("BIND_ADDR").ok();
    let config_file = std::env::var("CONFIG_FILE").ok();
    let templates_dir = std::env::var("TEMPLATES_DIR").ok();
    let fonts_dir = std::env::var("FONTS_DIR").ok();

    println!("Snapcard v{VERSION}");
    println!("Templated SVG to PNG rendering service\n");

    println!("Environment Variables:");
    println!(
        "  BIND_ADDR     = {}",
        bind_addr.as_deref().unwrap_or("0.0.0.0:3000 (default)")
    );
    println!(
        "  CONFIG_FILE   = {}",
        config_file.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  TEMPLATES_DIR = {}",
        templates_dir.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  FONTS_DIR     = {}",
        fonts_dir.as_deref().unwrap_or("(not set)")
    );

    let loader = AssetLoader::from_env();

    println!("\nAsset Sources:");
    let config_source = match config_file {
        Some(ref path) if Path::new(path).exists() => path.to_string(),
        Some(_) => "embedded (file not found)".to_string(),
        None => "embedded".to_string(),
    };
    println!("  Config:    {config_source}");

    let template_count = loader.list_template_identifiers().len();
    let embedded_count = AssetLoader::embedded_template_count();
    match templates_dir {
        Some(ref path) if Path::new(path).exists() => {
            println!("  Templates: {path} ({template_count} total, {embedded_count} embedded)")
        }
        _ => println!("  Templates: embedded ({embedded_count})"),
    }

    let font_count = loader.get_fonts().len();
    match fonts_dir {
        Some(ref path) => println!("  Fonts:     system + {path} ({font_count})"),
        None => println!("  Fonts:     system"),
    }

    let config = AppConfig::load_from_assets(&loader);
    println!("\nPool:");
    println!("  idle target = {}", config.pool.idle_target);
    println!("  max busy    = {}", config.pool.max_busy);
    println!("  warm up     = {}", config.pool.warm_up);

    println!("\nCommands:");
    println!("  snapcard serve      Start the HTTP server");
    println!("  snapcard dev        Start server with dev mode (template reload)");
    println!("  snapcard render     Render a template to a PNG file");
    println!("  snapcard templates  List available templates");
    println!("\nRun 'snapcard --help' for more details.");
}

/// Run the HTTP server
async fn run_server() -> anyhow::Result<()> {
    init_tracing("snapcard=debug,tower_http=debug", true);

    let asset_loader = Arc::new(AssetLoader::from_env());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    log_asset_sources(&asset_loader);

    let state = server::create_app_state(asset_loader).await?;
    let pool = state.pool.clone();

    let app = server::build_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Snapcard server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    pool.shutdown().await;
    Ok(())
}

/// Run the HTTP server with dev mode (template file watching)
async fn run_dev_server(no_cache: bool) -> anyhow::Result<()> {
    init_tracing("snapcard=debug,tower_http=debug", true);

    let asset_loader = Arc::new(AssetLoader::from_env());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    log_asset_sources(&asset_loader);

    let file_watcher = FileWatcher::new(asset_loader.templates_dir().map(Path::to_path_buf));

    let state = server::create_app_state(asset_loader).await?;
    let pool = state.pool.clone();

    if no_cache {
        state.templates.set_caching(false);
        tracing::info!("Template caching disabled");
    }
    if file_watcher.is_active() {
        file_watcher.invalidate_on_change(state.templates.clone());
        tracing::info!("File watcher active for template reload");
    } else {
        tracing::warn!("File watcher not active - set TEMPLATES_DIR to enable template reload");
    }

    let app = server::build_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Snapcard dev server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    pool.shutdown().await;
    Ok(())
}

fn log_asset_sources(loader: &AssetLoader) {
    let describe = |var: &str| std::env::var(var).unwrap_or_else(|_| "embedded".to_string());
    tracing::info!(
        templates = %describe("TEMPLATES_DIR"),
        fonts = %describe("FONTS_DIR"),
        config = %describe("CONFIG_FILE"),
        embedded_templates = AssetLoader::embedded_template_count(),
        known_templates = loader.list_template_identifiers().len(),
        "Asset sources configured"
    );
}
