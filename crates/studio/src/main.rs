use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use model::{DirtyRect, Rgba8};
use protocol::TextureApplier;
use studio::{EditorSession, MirrorCanvas, SessionConfig, logging};
use sync_bridge::SyncState;
use texture_applier::{CpuTextureBackend, ThreadedTextureApplier};

#[derive(Parser)]
#[command(author, version, about = "Headless skin-studio session driven by synthetic strokes")]
struct Arguments {
    /// JSON session config; missing keys use defaults.
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    /// Enable debug logging (RUST_LOG overrides the level).
    #[arg(long)]
    debug: bool,
    /// Frames of synthetic drawing before waiting for the final sync.
    #[arg(long, default_value_t = 240)]
    frames: u64,
    /// Brush size in canvas pixels.
    #[arg(long, default_value_t = 6)]
    brush: u32,
}

fn main() -> Result<()> {
    let arguments = Arguments::parse();
    let config = match &arguments.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("load session config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    logging::init(arguments.debug || config.debug);

    let backend = CpuTextureBackend::default();
    let applier = ThreadedTextureApplier::new(backend.clone(), config.texture_workers)
        .context("start texture workers")?;
    let canvas = MirrorCanvas::new(config.canvas_size()?, config.background());
    let mut session =
        EditorSession::new(&config, applier, canvas).context("create editor session")?;

    let frame_budget = config.scheduler_config()?.frame_budget;
    let mut brush = Brush::new(&config, arguments.brush);
    for frame in 0..arguments.frames {
        let started = Instant::now();
        brush.step(&mut session, frame)?;
        let report = session.frame();
        if let Some(error) = &report.sync.extraction_error {
            tracing::warn!(target: "studio", %error, "sync extraction failed");
        }
        for alert in session.take_alerts() {
            tracing::warn!(target: "studio", ?alert, "performance alert");
        }
        pace(started, frame_budget);
    }

    let settle_deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < settle_deadline {
        let started = Instant::now();
        session.frame();
        let diagnostics = session.diagnostics();
        if diagnostics.sync_state == SyncState::Idle
            && diagnostics.applied_version == diagnostics.last_extracted
            && diagnostics.pending_regions == 0
        {
            break;
        }
        pace(started, frame_budget);
    }

    let diagnostics = session.diagnostics();
    tracing::info!(
        target: "studio",
        frames = diagnostics.frames,
        edits = diagnostics.edit_sequence,
        extracted = %diagnostics.last_extracted,
        applied = %session.applier().applied_version(),
        average_fps = ?diagnostics.average_fps,
        min_fps = ?diagnostics.min_fps,
        redrawn_regions = session.store().redrawn_regions(),
        sync = ?diagnostics.sync,
        "session finished"
    );
    drop(session);
    tracing::info!(
        target: "studio",
        uploads = backend.uploads(),
        live_textures = backend.live_resources(),
        "texture backend released"
    );
    Ok(())
}

/// Bounces a square brush around the canvas, changing colour every second.
struct Brush {
    size: u32,
    x: u32,
    y: u32,
    dx: i64,
    dy: i64,
    max_x: u32,
    max_y: u32,
}

impl Brush {
    fn new(config: &SessionConfig, size: u32) -> Self {
        let size = size.clamp(1, config.canvas_width.min(config.canvas_height));
        Self {
            size,
            x: 0,
            y: 0,
            dx: 3,
            dy: 2,
            max_x: config.canvas_width - size,
            max_y: config.canvas_height - size,
        }
    }

    fn step<A, S>(&mut self, session: &mut EditorSession<A, S>, frame: u64) -> Result<()>
    where
        A: TextureApplier,
        S: frame_scheduler::BackingStore,
    {
        let rect = DirtyRect::new(self.x, self.y, self.size, self.size)?;
        session.fill(rect, palette(frame / 60))?;
        self.x = bounce(self.x, &mut self.dx, self.max_x);
        self.y = bounce(self.y, &mut self.dy, self.max_y);
        Ok(())
    }
}

fn bounce(position: u32, velocity: &mut i64, max: u32) -> u32 {
    let next = i64::from(position) + *velocity;
    if next < 0 || next > i64::from(max) {
        *velocity = -*velocity;
    }
    (i64::from(position) + *velocity).clamp(0, i64::from(max)) as u32
}

fn palette(index: u64) -> Rgba8 {
    const COLOURS: [Rgba8; 4] = [
        Rgba8::new(56, 118, 29, 255),
        Rgba8::new(106, 68, 40, 255),
        Rgba8::new(69, 145, 201, 255),
        Rgba8::new(230, 190, 140, 255),
    ];
    COLOURS[(index % COLOURS.len() as u64) as usize]
}

fn pace(started: Instant, frame_budget: Duration) {
    if let Some(remaining) = frame_budget.checked_sub(started.elapsed()) {
        std::thread::sleep(remaining);
    }
}
