use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backend::{Backend, HttpBackend, MockBackend};
use episode::{EpisodeId, StageId};
use timeline::Millis;
use workflow::{captions_for, EpisodeSession, Position, Studio, StudioConfig};

#[derive(Parser)]
#[command(name = "studio-cli")]
#[command(about = "Episode Studio CLI - drive the production pipeline from a terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend API root, overriding the config file
    #[arg(long, global = true, env = "STUDIO_BACKEND_URL")]
    backend_url: Option<String>,

    /// Use the in-memory backend instead of the REST service
    #[arg(long, global = true)]
    offline: bool,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the stage catalog
    Stages,

    /// Manage episodes
    Episodes {
        #[command(subcommand)]
        action: EpisodeAction,
    },

    /// Show approval state and phase of every stage
    Status {
        /// Episode id
        id: String,
    },

    /// Unapprove a stage and every stage after it
    Unapprove {
        /// Episode id
        id: String,

        /// Stage id from the catalog
        stage: String,
    },

    /// Print SubRip captions for an episode's audio track
    Captions {
        /// Episode id
        id: String,

        /// Shift every caption by this many milliseconds
        #[arg(long, default_value = "0")]
        offset_ms: Millis,
    },

    /// Create an episode and run it through every stage
    Demo {
        #[arg(long, default_value = "Episode 1")]
        title: String,

        /// Seed for the script stage
        #[arg(long, default_value = "")]
        seed: String,
    },

    /// Print the effective configuration, optionally saving it
    Config {
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
enum EpisodeAction {
    List,
    Create {
        /// Episode title
        title: String,
    },
    Delete {
        /// Episode id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(StudioConfig::default_path);
    let mut config = StudioConfig::load(&config_path)?;
    if let Some(url) = &cli.backend_url {
        config = config.with_base_url(url.clone());
    }

    if let Commands::Config { save } = cli.command {
        return config_command(&config, &config_path, save);
    }

    let backend: Arc<dyn Backend> = if cli.offline {
        info!("Using in-memory backend");
        Arc::new(MockBackend::default())
    } else {
        Arc::new(HttpBackend::new(config.backend.clone())?)
    };
    let mut studio = Studio::new(backend, config);

    let result = match cli.command {
        Commands::Stages => stages_command(&mut studio).await,
        Commands::Episodes { action } => episodes_command(&mut studio, action).await,
        Commands::Status { id } => status_command(&mut studio, &EpisodeId::new(id)).await,
        Commands::Unapprove { id, stage } => {
            unapprove_command(&mut studio, &EpisodeId::new(id), &StageId::new(stage)).await
        }
        Commands::Captions { id, offset_ms } => {
            captions_command(&mut studio, &EpisodeId::new(id), offset_ms).await
        }
        Commands::Demo { title, seed } => demo_command(&mut studio, &title, &seed).await,
        Commands::Config { .. } => Ok(()),
    };

    if studio.is_unreachable() {
        warn!(
            "Could not reach backend at {}",
            studio.config().backend.base_url
        );
    }
    result
}

fn config_command(config: &StudioConfig, path: &Path, save: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if save {
        config.save(path)?;
        info!("Config written to: {:?}", path);
    }
    Ok(())
}

async fn stages_command(studio: &mut Studio) -> Result<()> {
    let machine = studio.connect().await?;
    for stage in machine.catalog().stages() {
        println!("{:>2}  {:<22} {}", stage.order, stage.id.as_str(), stage.name);
    }
    Ok(())
}

async fn episodes_command(studio: &mut Studio, action: EpisodeAction) -> Result<()> {
    match action {
        EpisodeAction::List => {
            let episodes = studio.list_episodes().await?;
            if episodes.is_empty() {
                println!("No episodes.");
            }
            for ep in episodes {
                println!("{:<12} {:<32} {}", ep.id.as_str(), ep.title, ep.date);
            }
        }
        EpisodeAction::Create { title } => {
            let summary = studio.create_episode(&title).await?;
            println!("{}", summary.id);
        }
        EpisodeAction::Delete { id } => {
            studio.delete_episode(&EpisodeId::new(id.clone())).await?;
            info!("Deleted episode {}", id);
        }
    }
    Ok(())
}

fn print_status(session: &EpisodeSession) -> Result<()> {
    let episode = session.episode()?;
    let machine = session.machine();
    println!("{} \"{}\"", episode.id, episode.title);
    for stage in machine.catalog().stages() {
        let workflow = session.workflow(&stage.id)?;
        let marker = if machine.is_approved(&episode, &stage.id) {
            "approved"
        } else if stage.id == episode.current_stage {
            "current"
        } else {
            ""
        };
        println!(
            "  {:<10} {:<9} {:<10} {}",
            stage.name,
            marker,
            workflow.phase().to_string(),
            workflow.describe()
        );
    }
    match session.position()? {
        Position::Complete => println!("  pipeline complete"),
        Position::Stage(id) => println!("  current stage: {id}"),
    }
    Ok(())
}

async fn status_command(studio: &mut Studio, id: &EpisodeId) -> Result<()> {
    let session = studio.open(id).await?;
    print_status(&session)
}

async fn unapprove_command(studio: &mut Studio, id: &EpisodeId, stage: &StageId) -> Result<()> {
    let mut session = studio.open(id).await?;
    let reset = session.unapprove(stage).await?;
    let names: Vec<String> = reset.iter().map(|s| s.to_string()).collect();
    info!("Unapproved: {}", names.join(", "));
    print_status(&session)
}

async fn captions_command(studio: &mut Studio, id: &EpisodeId, offset_ms: Millis) -> Result<()> {
    let session = studio.open(id).await?;
    let episode = session.episode()?;
    if episode.timeline.clips.is_empty() {
        bail!("episode {} has no timeline yet", id);
    }
    print!("{}", captions_for(&episode, offset_ms));
    Ok(())
}

async fn demo_command(studio: &mut Studio, title: &str, seed: &str) -> Result<()> {
    let mut session = studio.start_episode(title).await?;
    info!("Created episode {}", session.ticket().episode_id());

    // Context
    session.enter().await?;
    session.approve_current().await?;

    // Script
    session.enter().await?;
    let script = session.script()?;
    script.submit_seed(seed).await?;
    if script.draft().is_none() {
        warn!("Seed conflicts with earlier episodes; proceeding anyway");
        script.proceed_anyway().await?;
    }
    let lines = script.generate_script().await.context("script generation")?;
    info!("Script has {} lines", lines);
    session.approve_current().await?;

    // Voice
    session.enter().await?;
    let voiced = session.voice()?.generate_all().await?;
    info!("Voiced {} lines", voiced);
    session.approve_current().await?;

    // Scenes
    session.enter().await?;
    let scenes = session.scenes()?;
    let count = scenes.generate_breakdown().await?;
    scenes.generate_all().await?;
    info!("Generated {} scene images", count);
    session.approve_current().await?;

    // Timeline
    session.enter().await?;
    let timeline = session.timeline()?;
    let output = timeline.export().await?;
    info!(
        "Exported {} ({} ms)",
        output,
        timeline.duration()?.ms()
    );
    session.approve_current().await?;

    // Thumbnail
    session.enter().await?;
    let position = session.approve_current().await?;
    if position != Position::Complete {
        bail!("pipeline stopped at {:?}", position);
    }

    print_status(&session)
}
