//! CLI binary for docrender.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RenderConfig` plus rasteriser commands and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use docrender::pipeline::encode::error_page;
use docrender::{
    AdapterSet, CommandRasterizer, ContentKind, DiskStore, ImageCache, ProgressCallback,
    RenderConfig, RenderOutput, RenderProgressCallback, Renderer, TaskId,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress indicator: a bar that appears when a render starts with
/// queued work and is cleared when the queue is empty.
struct CliProgressCallback {
    bar: ProgressBar,
    last: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self {
            bar,
            last: Mutex::new(None),
        })
    }

    fn elapsed_since_last(&self) -> u128 {
        let mut last = self.last.lock();
        let ms = last.map(|t| t.elapsed().as_millis()).unwrap_or(0);
        *last = Some(Instant::now());
        ms
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_render_start(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} items  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
        self.bar.enable_steady_tick(Duration::from_millis(80));
        *self.last.lock() = Some(Instant::now());
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total} deferred item(s)…"))
        ));
    }

    fn on_task_complete(&self, _id: TaskId, kind: ContentKind, completed: usize, total: usize) {
        let ms = self.elapsed_since_last();
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            completed,
            total,
            kind.label(),
            dim(&format!("{:.1}s", ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_task_error(
        &self,
        _id: TaskId,
        kind: ContentKind,
        completed: usize,
        total: usize,
        error: &str,
    ) {
        self.elapsed_since_last();

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<14}  {}",
            red("✗"),
            completed,
            total,
            kind.label(),
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_render_complete(&self, total: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} item(s) rendered", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {}/{} item(s) rendered  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render to stdout (no rasterisers: plain HTML)
  docrender README.md

  # Mermaid diagrams through mermaid-cli, SVG through rsvg-convert
  docrender --diagram-cmd "mmdc -i - -o - -e png" \
            --svg-cmd "rsvg-convert -f png" README.md -o README.html

  # Persistent cache between runs
  docrender --cache-dir ~/.cache/docrender --diagram-cmd "mmdc -i - -o - -e png" doc.md

  # Export: never wait longer than 60 seconds
  docrender --export --fallback-timeout 60 doc.md -o doc.html

  # Read from stdin, emit JSON with per-item outcomes
  cat doc.md | docrender --json -

  # Inspect or clear the persistent cache
  docrender --cache-dir ~/.cache/docrender --cache-stats
  docrender --cache-dir ~/.cache/docrender --clear-cache

RASTERISER COMMANDS:
  Each command receives the item source on stdin and must write a PNG (or
  JPEG) to stdout, or a JSON object {"data": "<base64>", "width": W,
  "height": H}. Non-zero exit or empty output renders an inline error box.

ENVIRONMENT VARIABLES:
  DOCRENDER_DIAGRAM_CMD   Rasteriser for fenced diagram blocks
  DOCRENDER_HTML_CMD      Rasteriser for large HTML blocks
  DOCRENDER_SVG_CMD       Rasteriser for SVG images
  DOCRENDER_CACHE_DIR     Persistent cache directory
  RUST_LOG                Override log filter (e.g. docrender=debug)
"#;

/// Render Markdown to HTML with cached, asynchronous diagram rasterisation.
#[derive(Parser, Debug)]
#[command(
    name = "docrender",
    version,
    about = "Render Markdown to HTML with cached, asynchronous diagram rasterisation",
    long_about = "Render Markdown documents to self-contained HTML. Fenced diagram blocks, large \
raw HTML blocks and SVG images are rasterised by external commands, embedded as data URIs and \
cached by content fingerprint. A failing item becomes an inline error report.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file path, or `-` for stdin.
    input: Option<String>,

    /// Write HTML to this file instead of stdout.
    #[arg(short, long, env = "DOCRENDER_OUTPUT")]
    output: Option<PathBuf>,

    /// Command that rasterises fenced diagram blocks.
    #[arg(long, env = "DOCRENDER_DIAGRAM_CMD")]
    diagram_cmd: Option<String>,

    /// Command that rasterises large raw HTML blocks.
    #[arg(long, env = "DOCRENDER_HTML_CMD")]
    html_cmd: Option<String>,

    /// Command that rasterises SVG images.
    #[arg(long, env = "DOCRENDER_SVG_CMD")]
    svg_cmd: Option<String>,

    /// Fence languages treated as diagrams (comma-separated).
    #[arg(long, env = "DOCRENDER_DIAGRAM_LANGS", default_value = "mermaid", value_delimiter = ',')]
    diagram_langs: Vec<String>,

    /// Persistent cache directory. In-memory only when unset.
    #[arg(long, env = "DOCRENDER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Maximum number of cached images.
    #[arg(long, env = "DOCRENDER_MAX_CACHE_ITEMS", default_value_t = 1000)]
    max_cache_items: usize,

    /// Print cache occupancy and exit.
    #[arg(long)]
    cache_stats: bool,

    /// Empty the cache and exit.
    #[arg(long)]
    clear_cache: bool,

    /// Display scale applied to rasterised image dimensions (0–1].
    #[arg(long, env = "DOCRENDER_SCALE", default_value_t = 0.25)]
    scale: f32,

    /// Minimum trimmed length for an HTML block to be rasterised.
    #[arg(long, env = "DOCRENDER_HTML_MIN_LEN", default_value_t = 100)]
    html_min_len: usize,

    /// Per-item rasteriser timeout in seconds.
    #[arg(long, env = "DOCRENDER_RENDER_TIMEOUT", default_value_t = 30)]
    render_timeout: u64,

    /// Per-image retrieval timeout in seconds.
    #[arg(long, env = "DOCRENDER_FETCH_TIMEOUT", default_value_t = 30)]
    fetch_timeout: u64,

    /// Export mode: stop waiting after `--fallback-timeout` seconds.
    #[arg(long, env = "DOCRENDER_EXPORT")]
    export: bool,

    /// Export ceiling in seconds.
    #[arg(long, env = "DOCRENDER_FALLBACK_TIMEOUT", default_value_t = 120)]
    fallback_timeout: u64,

    /// Resolve relative image paths against this directory.
    #[arg(long, env = "DOCRENDER_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Output structured JSON (RenderOutput) instead of HTML.
    #[arg(long, env = "DOCRENDER_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCRENDER_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCRENDER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCRENDER_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Cache ────────────────────────────────────────────────────────────
    let cache = Arc::new(open_cache(&cli)?);

    if cli.clear_cache {
        if !cache.clear() {
            anyhow::bail!("Failed to clear cache");
        }
        if !cli.quiet {
            eprintln!("{} cache cleared", green("✔"));
        }
        return Ok(());
    }

    if cli.cache_stats {
        print_cache_stats(&cache, cli.json)?;
        return Ok(());
    }

    let Some(input) = cli.input.as_deref() else {
        anyhow::bail!("No input given (use `-` for stdin)");
    };

    // ── Build renderer ───────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RenderProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let renderer = Renderer::new(config, build_adapters(&cli, cache));

    // ── Render ───────────────────────────────────────────────────────────
    let result = if input == "-" {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read stdin")?;
        if cli.export {
            renderer.render_for_export(&source).await
        } else {
            renderer.render(&source).await
        }
    } else if cli.export {
        let source = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {input}"))?;
        renderer.render_for_export(&source).await
    } else {
        renderer.render_file(input).await
    };

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            // The whole document is unusable; replace it with the error page.
            if !cli.json {
                write_body(&cli, &error_page(&e))?;
            }
            return Err(e).context("Render failed");
        }
    };

    write_output(&cli, &output)?;

    if !cli.quiet && !show_progress && !cli.json {
        eprintln!(
            "Rendered {}/{} item(s) in {}ms ({} from cache)",
            output.stats.rendered,
            output.stats.total_tasks,
            output.stats.total_duration_ms,
            output.stats.cache_hits
        );
    }
    if output.timed_out && !cli.quiet {
        eprintln!("{} export ceiling reached; some items show a timeout notice", cyan("⚠"));
    }

    Ok(())
}

/// Map CLI args to `RenderConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RenderConfig> {
    let mut builder = RenderConfig::builder()
        .max_cache_items(cli.max_cache_items)
        .display_scale(cli.scale)
        .html_min_len(cli.html_min_len)
        .render_timeout_secs(cli.render_timeout)
        .fetch_timeout_secs(cli.fetch_timeout)
        .fallback_timeout_secs(cli.fallback_timeout)
        .diagram_languages(cli.diagram_langs.iter().map(|s| s.trim().to_string()));

    if let Some(ref dir) = cli.base_dir {
        builder = builder.base_dir(dir.clone());
    }
    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn open_cache(cli: &Cli) -> Result<ImageCache> {
    match cli.cache_dir {
        Some(ref dir) => {
            let store = DiskStore::open(dir, cli.max_cache_items)
                .with_context(|| format!("Failed to open cache at {}", dir.display()))?;
            Ok(ImageCache::new(store))
        }
        None => Ok(ImageCache::in_memory(cli.max_cache_items)),
    }
}

fn build_adapters(cli: &Cli, cache: Arc<ImageCache>) -> AdapterSet {
    let mut adapters = AdapterSet::new(cache);
    for (kind, line) in [
        (ContentKind::Diagram, &cli.diagram_cmd),
        (ContentKind::HtmlBlock, &cli.html_cmd),
        (ContentKind::VectorImage, &cli.svg_cmd),
    ] {
        if let Some(backend) = line.as_deref().and_then(CommandRasterizer::from_command_line) {
            adapters = adapters.with_backend(kind, Arc::new(backend));
        }
    }
    adapters
}

fn write_output(cli: &Cli, output: &RenderOutput) -> Result<()> {
    let body = if cli.json {
        serde_json::to_string_pretty(output).context("Failed to serialise output")?
    } else {
        output.html.clone()
    };
    write_body(cli, &body)
}

fn write_body(cli: &Cli, body: &str) -> Result<()> {
    match cli.output {
        Some(ref path) => {
            std::fs::write(path, body.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(body.as_bytes())
                .context("Failed to write to stdout")?;
            if !body.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}

fn print_cache_stats(cache: &ImageCache, json: bool) -> Result<()> {
    let stats = cache.stats();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialise cache stats")?
        );
        return Ok(());
    }

    println!("Items:        {}/{}", stats.item_count, stats.max_items);
    println!("Total size:   {} bytes", stats.total_size_bytes);
    for item in &stats.items {
        println!(
            "  {}  {:<14} {:>9}  {}",
            dim(&item.key.chars().take(16).collect::<String>()),
            item.kind.label(),
            item.size_bytes,
            dim(&item.last_accessed_at.to_rfc3339()),
        );
    }
    Ok(())
}
