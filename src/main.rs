use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, MultiSelect, Select};
use fileconv::{
    AppConfig, BatchEvent, BatchSummary, Category, ConversionOptions, Session, TextEncoding,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use walkdir::WalkDir;

#[derive(Subcommand, Debug)]
enum Command {
    /// List the supported input and output formats of every category
    Formats,
}

#[derive(Parser, Debug)]
#[command(version, about = "Convert images, documents, audio and video files in batches.")]
struct Args {
    /// Optional subcommands
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Files (or directories of files) to convert
    files: Vec<PathBuf>,

    /// Category: images, documents, audio or video (guessed from the first file when omitted)
    #[arg(long, short)]
    category: Option<String>,

    /// Target format, e.g. png, json, mp3
    #[arg(long, short)]
    to: Option<String>,

    /// Output directory (created if missing)
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Image quality (1-100) for lossy formats
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Resize images to this width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Resize images to this height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Text encoding for csv/txt/json documents (utf-8, utf-8-sig, latin-1, ascii)
    #[arg(long)]
    encoding: Option<String>,

    /// Leave the header row out of csv/txt/xlsx output
    #[arg(long, default_value_t = false)]
    no_headers: bool,

    /// Codec passed to ffmpeg (-acodec / -vcodec)
    #[arg(long)]
    codec: Option<String>,

    /// Bitrate passed to ffmpeg (-b:a / -b:v), e.g. 192k
    #[arg(long)]
    bitrate: Option<String>,

    /// Config file (defaults to fileconv.toml in the config dir or current dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Never prompt; fail if something required is missing
    #[arg(long, short, default_value_t = false)]
    yes: bool,

    /// Log per-file details
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "fileconv=debug" } else { "fileconv=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(Command::Formats) = &args.cmd {
        print_formats();
        return Ok(());
    }

    let interactive = !args.yes;
    let cfg = AppConfig::load(args.config.as_deref()).context("loading config")?;
    let mut session = Session::new(cfg.clone());
    session.set_options(build_options(&args, &cfg)?);

    let mut files = args.files.clone();
    let mut category_arg = args
        .category
        .as_deref()
        .map(str::parse::<Category>)
        .transpose()?;
    let mut target_arg = args.to.clone();
    let mut out_arg = args.out.clone();

    loop {
        // --- Interactive Prompts ---
        if files.is_empty() {
            if !interactive {
                return Err(anyhow!("No input files given (pass files or drop --yes)."));
            }
            files = pick_files(category_arg)?;
            if files.is_empty() {
                return Err(anyhow!("No files selected."));
            }
        }

        let category = match category_arg {
            Some(c) => c,
            None => match guess_category(&files) {
                Some(c) => c,
                None if interactive => pick_category()?,
                None => return Err(anyhow!("Cannot guess the category; pass --category.")),
            },
        };

        let inputs = expand_inputs(&files, category);
        if inputs.is_empty() {
            return Err(anyhow!("No {} files found in the given paths.", category));
        }

        let target = match target_arg.take() {
            Some(t) => t,
            None if interactive => pick_target(category)?,
            None => return Err(anyhow!("No target format given; pass --to.")),
        };

        let output_dir = match out_arg.take() {
            Some(dir) => dir,
            None if interactive => {
                let entered: String = Input::new()
                    .with_prompt("Output directory")
                    .default(session.output_dir().display().to_string())
                    .interact_text()?;
                PathBuf::from(entered)
            }
            None => session.output_dir().to_path_buf(),
        };

        // --- Execution ---
        session.clear_files(category);
        session.add_files(category, inputs);
        session.set_output_dir(&output_dir);
        println!(
            "{}: {} -> {}",
            category,
            session.selection(category).map(|s| s.describe()).unwrap_or_default(),
            target
        );

        let summary = run_batch(&mut session, category, &target)?;
        println!("\n{}", summary.status_line());
        if let Some(note) = summary.notification() {
            println!("{}", note);
        }

        if !interactive
            || !Confirm::new()
                .with_prompt("Convert more files?")
                .default(false)
                .interact()?
        {
            break;
        }
        files.clear();
        category_arg = None;
    }

    if session.history().len() > 1 {
        println!("\n--- History ---");
        for entry in session.history().entries() {
            println!("{}", entry);
        }
    }

    Ok(())
}

fn build_options(args: &Args, cfg: &AppConfig) -> Result<ConversionOptions> {
    let mut opts = ConversionOptions::from_config(cfg).with_size(args.width, args.height);
    if let Some(q) = args.quality {
        opts = opts.with_quality(q);
    }
    if let Some(name) = args.encoding.as_deref() {
        opts = opts.with_encoding(name.parse::<TextEncoding>()?);
    }
    if args.no_headers {
        opts = opts.with_headers(false);
    }
    if let Some(codec) = &args.codec {
        opts = opts.with_codec(codec.as_str());
    }
    if let Some(bitrate) = &args.bitrate {
        opts = opts.with_bitrate(bitrate.as_str());
    }
    Ok(opts)
}

fn run_batch(session: &mut Session, category: Category, target: &str) -> Result<BatchSummary> {
    let handle = session.start(category, target)?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("building progress style")?
            .progress_chars("#>-"),
    );

    for event in handle.events() {
        match event {
            BatchEvent::Progress(p) => {
                pb.set_position(p.percentage.round() as u64);
                pb.set_message(p.message);
            }
            BatchEvent::FileConverted { output, .. } => {
                tracing::debug!(output = %output.display(), "written");
            }
            BatchEvent::FileFailed { input, error } => {
                pb.println(format!("✗ {}: {}", input.display(), error));
            }
            BatchEvent::Warning(w) => pb.println(format!("Warning: {}", w)),
            BatchEvent::Finished(_) => pb.finish_with_message("Done"),
        }
    }
    if !pb.is_finished() {
        pb.abandon();
    }

    let summary = session.finish(handle).context("conversion batch")?;
    Ok(summary)
}

fn print_formats() {
    for category in Category::ALL {
        println!("{}", category);
        println!("  input:  {}", category.input_extensions().join(", "));
        println!("  output: {}", category.target_formats().join(", "));
    }
}

fn guess_category(files: &[PathBuf]) -> Option<Category> {
    files.iter().filter(|p| !p.is_dir()).find_map(|p| Category::from_path(p))
}

/// Files as given; directories contribute their direct children of the right category.
fn expand_inputs(paths: &[PathBuf], category: Category) -> Vec<PathBuf> {
    let mut inputs = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.is_file() && category.accepts_input(p))
                .collect();
            found.sort();
            inputs.extend(found);
        } else {
            inputs.push(path.clone());
        }
    }
    inputs
}

fn find_media_files(dir: &Path, category: Option<Category>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.is_file()
                && match category {
                    Some(c) => c.accepts_input(p),
                    None => Category::from_path(p).is_some(),
                }
        })
        .collect();
    files.sort();
    files
}

fn pick_files(category: Option<Category>) -> Result<Vec<PathBuf>> {
    let candidates = find_media_files(Path::new("."), category);
    if candidates.is_empty() {
        return Err(anyhow!("No convertible files found in current directory."));
    }
    let labels: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    let chosen = MultiSelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
        .with_prompt("Choose files to convert (space to select)")
        .items(&labels)
        .interact()?;
    Ok(chosen.into_iter().map(|i| candidates[i].clone()).collect())
}

fn pick_category() -> Result<Category> {
    let labels: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
    let idx = Select::new()
        .with_prompt("Category")
        .default(0)
        .items(&labels)
        .interact()?;
    Ok(Category::ALL[idx])
}

fn pick_target(category: Category) -> Result<String> {
    let formats = category.target_formats();
    let idx = Select::new()
        .with_prompt("Convert to")
        .default(0)
        .items(formats)
        .interact()?;
    Ok(formats[idx].to_string())
}
