mod config;
use clap::Parser;
use config::StudioConfig;
use instalicious_core::images::{ImageClient, ImageMode, ImageSize, ResponseEncoding};
use instalicious_core::llm::CompletionClient;
use instalicious_core::telemetry::init_tracing;
use instalicious_core::{
    OrchestratorOptions, PostOrchestrator, PostRequest, PostVariant, ReferenceImage,
    SessionContext,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Transform any meal into a stunning, Insta-worthy post.
#[derive(Debug, Parser)]
#[command(name = "post_studio", version)]
struct Cli {
    /// A description of the dish, a mood, a pasted recipe, a restaurant experience...
    #[arg(short, long)]
    prompt: String,

    /// recipe, description, with_image or no_image
    #[arg(short, long, default_value = "no_image")]
    variant: PostVariant,

    /// Photo of the meal (PNG, JPEG, WebP); implies --variant with_image
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// square or stories
    #[arg(short, long)]
    size: Option<ImageSize>,

    /// Generate a batch of three square images instead of one
    #[arg(long)]
    batch: bool,

    /// Ask the image endpoint for URLs instead of inline data
    #[arg(long, conflicts_with = "batch")]
    url: bool,

    /// Skip image generation even when an image prompt comes back
    #[arg(long)]
    no_images: bool,

    /// Override the text model (e.g. gpt-4-1106-preview)
    #[arg(long)]
    model: Option<String>,

    /// Directory for generated PNG files
    #[arg(short, long)]
    out: Option<PathBuf>,

    #[arg(long, env = "POST_STUDIO_PASSWORD")]
    access_code: Option<String>,

    /// Print the result as JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Gate in front of the home step; no configured code means open access
fn verify_access(expected: Option<&str>, supplied: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(code) => supplied.map(str::trim) == Some(code),
    }
}

fn image_path(dir: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        dir.join("instalicious_image.png")
    } else {
        dir.join(format!("instalicious_image_{}.png", index + 1))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let json_logs = std::env::var("POST_STUDIO_LOG_JSON").is_ok_and(|v| v == "1");
    init_tracing(
        "info,instalicious_core=info,post_studio=info",
        json_logs,
    );

    let cli = Cli::parse();
    let mut cfg = StudioConfig::load();

    if !verify_access(cfg.studio.access_code.as_deref(), cli.access_code.as_deref()) {
        eprintln!("Incorrect password. Please try again.");
        return Ok(ExitCode::from(2));
    }

    // Flags override file/env settings
    if let Some(model) = cli.model.clone() {
        cfg.completion.text_model = model;
    }
    if let Some(size) = cli.size {
        cfg.studio.image_size = size;
    }
    if cli.batch {
        cfg.studio.image_mode = ImageMode::Batch;
    } else if cli.url {
        cfg.studio.image_mode = ImageMode::Single {
            encoding: ResponseEncoding::Url,
        };
    }
    let out_dir = cli.out.clone().unwrap_or_else(|| cfg.studio.output_dir.clone());

    let mut request = PostRequest::new(cli.prompt.clone(), cli.variant);
    if let Some(path) = &cli.image {
        match ReferenceImage::from_path(path) {
            Ok(img) => {
                request.variant = PostVariant::WithImage;
                request = request.with_reference_image(img);
            }
            Err(e) => {
                eprintln!("{}", e.user_message());
                return Ok(ExitCode::from(1));
            }
        }
    }

    info!(
        target = "post_studio",
        variant = ?request.variant,
        text_model = %cfg.completion.text_model,
        mode = ?cfg.studio.image_mode,
        "Generating post"
    );

    let orchestrator = PostOrchestrator::new(
        Arc::new(CompletionClient::new(cfg.completion.clone())?),
        Arc::new(ImageClient::new(cfg.images.clone())?),
        OrchestratorOptions {
            image_mode: cfg.studio.image_mode,
            image_size: cfg.studio.image_size,
            generate_images: !cli.no_images,
        },
    );
    let mut session = SessionContext::new(format!("cli-{}", std::process::id()));

    if let Err(e) = orchestrator.generate(&mut session, request).await {
        error!(target = "post_studio", error = %e, "Post generation failed");
        eprintln!("{}", e.user_message());
        return Ok(ExitCode::from(1));
    }

    let Some(post) = session.post() else {
        eprintln!("No post was produced.");
        return Ok(ExitCode::from(1));
    };

    let total = session.images().len();
    let mut saved = Vec::with_capacity(total);
    if total > 0 {
        std::fs::create_dir_all(&out_dir)?;
    }
    for (i, img) in session.images().iter().enumerate() {
        let path = image_path(&out_dir, i, total);
        img.save_png(&path)?;
        info!(target = "post_studio", path = %path.display(), "Saved image");
        saved.push(path);
    }

    if cli.json {
        let out = serde_json::json!({
            "post": post.post,
            "hashtags": post.hashtags,
            "image_prompt": post.image_prompt,
            "images": saved.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "attempts": session.completion_attempts(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Post:\n{}\n", post.post);
        println!("Hashtags:\n{}\n", post.rendered_hashtags());
        if let Some(p) = &post.image_prompt {
            println!("Image prompt:\n{p}\n");
        }
        for path in &saved {
            println!("Here's your image: {}", path.display());
        }
    }

    session.reset();
    Ok(ExitCode::SUCCESS)
}
