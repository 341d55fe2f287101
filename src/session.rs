//! The mirror session: one owned engine value that creates every
//! resource at startup, runs the vsync-locked render loop on the main
//! thread and the capture engine on its own thread, and tears
//! everything down in reverse order after the capture thread joins.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;

use crate::config::MirrorConfig;
use crate::cursor::CursorState;
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{SourceDescriptor, SourceFormat};
use crate::pacing::{self, FramePacer, PacingConfig, PresentOutcome};
use crate::platform::windows::duplication::CaptureEngine;
use crate::platform::windows::render::RenderEngine;
use crate::platform::windows::window::{self, MirrorWindow};
use crate::platform::windows::{com, monitor};
use crate::stats::{CaptureCounters, IntervalStats};
use crate::triple_buffer::TripleBuffer;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// The three render-device slot textures plus the descriptor learned
/// from the first captured frame. Installed by the capture thread on
/// its first frame, and re-installed after an access-lost rebuild when
/// the desktop mode may have changed.
pub(crate) struct SlotTable {
    pub textures: [ID3D11Texture2D; 3],
    pub descriptor: SourceDescriptor,
}

// Handed across threads behind the slots mutex and generation counter;
// after installation the textures are only touched by the render
// thread's context, while the capture thread works through its own
// shared-handle aliases. D3D11 resource objects themselves are
// free-threaded.
unsafe impl Send for SlotTable {}
unsafe impl Sync for SlotTable {}

/// State shared between the capture thread and the render loop. All
/// steady-state communication is atomics plus the lock-free triple
/// buffer; the mutexes are touched only at initialization and on
/// cursor-shape changes.
pub struct SharedState {
    pub running: Arc<AtomicBool>,
    pub buffer: TripleBuffer,
    pub counters: CaptureCounters,
    pub cursor: CursorState,
    buffer_ready: AtomicBool,
    /// Current slot table; replaced wholesale on re-initialization.
    /// The render loop polls only `slots_generation` per frame and
    /// takes the lock exclusively when the generation moved.
    slots: Mutex<Option<Arc<SlotTable>>>,
    slots_generation: AtomicU64,
    failure: Mutex<Option<MirrorError>>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: Arc::new(AtomicBool::new(true)),
            buffer: TripleBuffer::new(),
            counters: CaptureCounters::new(),
            cursor: CursorState::new(),
            buffer_ready: AtomicBool::new(false),
            slots: Mutex::new(None),
            slots_generation: AtomicU64::new(0),
            failure: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// True once the capture thread has published its first frame. A
    /// consumer observing `true` also observes the slot contents and
    /// the format descriptor (release/acquire pair).
    pub fn is_buffer_ready(&self) -> bool {
        self.buffer_ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_buffer_ready(&self) {
        self.buffer_ready.store(true, Ordering::Release);
    }

    pub(crate) fn install_slots(&self, table: SlotTable) {
        let mut slot = match self.slots.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(table));
        drop(slot);
        self.slots_generation.fetch_add(1, Ordering::Release);
    }

    /// Bumps on every slot-table install; the render engine compares
    /// this against its cached value to notice re-initialization
    /// without taking the lock on the steady-state path.
    pub(crate) fn slots_generation(&self) -> u64 {
        self.slots_generation.load(Ordering::Acquire)
    }

    pub(crate) fn slot_table(&self) -> Option<Arc<SlotTable>> {
        match self.slots.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn source_descriptor(&self) -> Option<SourceDescriptor> {
        self.slot_table().map(|table| table.descriptor)
    }

    pub(crate) fn record_failure(&self, error: MirrorError) {
        let mut slot = match self.failure.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.get_or_insert(error);
    }

    fn take_failure(&self) -> Option<MirrorError> {
        match self.failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Print the `--list` monitor table and return.
pub fn print_monitor_table() -> MirrorResult<()> {
    window::set_dpi_awareness();
    let monitors = monitor::enumerate_monitors()?;
    println!("Available monitors:");
    for descriptor in &monitors {
        println!("{}", descriptor.list_line());
    }
    Ok(())
}

/// Run the mirror until a shutdown signal arrives.
pub fn run(config: MirrorConfig) -> MirrorResult<()> {
    window::set_dpi_awareness();
    let _com = com::CoInitGuard::init_multithreaded().map_err(MirrorError::Platform)?;

    let monitors = monitor::enumerate_monitors()?;
    config.validate_monitors(monitors.len())?;
    let source = &monitors[config.source_index];
    let target = &monitors[config.target_index];

    println!("Glass Mirror");
    println!(
        "  Source: {} ({}x{})",
        config.source_index,
        source.width(),
        source.height()
    );
    println!(
        "  Target: {} ({}x{})",
        config.target_index,
        target.width(),
        target.height()
    );
    println!("  Output: VSync");

    let shared = SharedState::new();
    window::install_console_handler(shared.running.clone())?;

    let mirror_window = MirrorWindow::create(target, shared.running.clone())?;
    let mut render = RenderEngine::new(&mirror_window, &config)?;
    let capture = CaptureEngine::new(
        source,
        render.device().clone(),
        shared.clone(),
        config.show_cursor,
    )?;

    let info = capture.info();
    println!(
        "  Reported format: {}",
        if info.reported_hdr { "HDR" } else { "SDR" }
    );
    println!(
        "  Resolution: {}x{} @ {:.2}Hz",
        info.width, info.height, info.refresh_hz
    );
    if let Some(os_white) = source.sdr_white_nits {
        if config.tonemap && (os_white - config.sdr_white_nits).abs() >= 1.0 {
            println!(
                "  OS SDR white level: {os_white:.0} nits (using --sdr-white {:.0})",
                config.sdr_white_nits
            );
        }
    }

    let target_hz = render.target_refresh_hz().unwrap_or(60.0);
    let target_frame_skip = pacing::target_frame_skip(info.refresh_hz, target_hz);
    println!("  Target: {target_hz:.2}Hz (frame skip: {target_frame_skip})");
    println!(
        "  Frame pacing: {}",
        config.pacing_description(target_frame_skip)
    );

    // The capture thread initializes the triple buffer on its first
    // frame; only then is the actual format known.
    let capture_thread = std::thread::Builder::new()
        .name("glass-mirror-capture".to_string())
        .spawn(move || capture.run())
        .map_err(|error| {
            MirrorError::Platform(anyhow::anyhow!(
                "failed to spawn the capture thread: {error}"
            ))
        })?;

    let result = (|| -> MirrorResult<()> {
        wait_for_first_frame(&shared)?;
        if !shared.is_running() {
            return Ok(());
        }

        if let Some(descriptor) = shared.source_descriptor() {
            println!("  Actual format: {}", descriptor.format);
            println!("  Processing: {}", processing_description(descriptor, &config));
        }
        println!("\nPress ESC to exit (or CTRL+C).\n");

        render_loop(&config, &shared, &mirror_window, &mut render, target_frame_skip);

        // A capture-side failure after startup (e.g. the source mode
        // changed to an unsupported format) ends the loop through the
        // running flag; report it instead of exiting silently.
        if let Some(failure) = shared.take_failure() {
            return Err(failure);
        }
        Ok(())
    })();

    // Shutdown: stop, join the capture thread, then let the engines
    // drop in reverse creation order.
    shared.stop();
    let _ = capture_thread.join();

    if result.is_ok() {
        println!("\nShutting down...");
    }
    result?;
    println!("Done.");
    Ok(())
}

/// Block until the capture thread publishes its first frame, a
/// shutdown signal arrives, or the startup window elapses.
fn wait_for_first_frame(shared: &SharedState) -> MirrorResult<()> {
    println!("  Waiting for first frame...");
    let started = Instant::now();
    while shared.is_running() && !shared.is_buffer_ready() {
        if let Some(failure) = shared.take_failure() {
            return Err(failure);
        }
        if started.elapsed() > FIRST_FRAME_TIMEOUT {
            eprintln!("ERROR: Timeout waiting for first frame. Is the source monitor active?");
            eprintln!("       Try moving your mouse on the source monitor to trigger an update.");
            return Err(MirrorError::FirstFrameTimeout);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if let Some(failure) = shared.take_failure() {
        return Err(failure);
    }
    Ok(())
}

fn render_loop(
    config: &MirrorConfig,
    shared: &SharedState,
    mirror_window: &MirrorWindow,
    render: &mut RenderEngine,
    target_frame_skip: u64,
) {
    let mut pacer = FramePacer::new(PacingConfig {
        smart_selection: config.use_smart_frame_selection,
        frame_delay: config.frame_delay,
        target_frame_skip,
    });
    let mut stats = IntervalStats::new();
    let mut last_stats = Instant::now();

    while shared.is_running() {
        // Aligns this iteration right after the destination vsync.
        if config.use_waitable_swapchain {
            render.wait_for_latency_gate();
        }

        if let Some(delay) = pacer.pre_acquire_delay(shared.counters.frame_id()) {
            pacing::spin_sleep(delay);
        }

        if !mirror_window.drain_messages() {
            shared.stop();
            break;
        }
        if !shared.is_running() {
            break;
        }

        let rendered = match render.render(shared) {
            Ok(rendered) => rendered,
            Err(error) => {
                // Steady-state render errors never end the process.
                debug!("render iteration failed: {error}");
                None
            }
        };
        render.present();

        if let Some(frame_id) = rendered {
            match pacer.note_presented(frame_id) {
                PresentOutcome::Unique { skip_delta } => stats.record_unique(skip_delta),
                PresentOutcome::Duplicate => stats.record_duplicate(),
            }
        } else {
            stats.record_duplicate();
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let line = stats.drain(shared.counters.take_captured());
            print!("\r{line}   ");
            let _ = std::io::stdout().flush();
            last_stats = Instant::now();
        }
    }
}

fn processing_description(descriptor: SourceDescriptor, config: &MirrorConfig) -> String {
    match descriptor.format {
        SourceFormat::Rgba16Float if config.tonemap => format!(
            "maxRGB Reinhard tonemapping (HDR to SDR, sdrWhite={:.0} nits)",
            config.sdr_white_nits
        ),
        SourceFormat::Rgba16Float => "None (--no-tonemap, HDR values may clip)".to_string(),
        SourceFormat::Bgra8 if descriptor.reported_hdr => {
            "Linear to sRGB gamma (SDR container from HDR source)".to_string()
        }
        SourceFormat::Bgra8 => "Passthrough (SDR)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorArgs;
    use clap::Parser;

    fn config(argv: &[&str]) -> MirrorConfig {
        let args =
            MirrorArgs::try_parse_from(std::iter::once("glass-mirror").chain(argv.iter().copied()))
                .unwrap();
        MirrorConfig::from_args(&args).unwrap()
    }

    fn descriptor(format: SourceFormat, reported_hdr: bool) -> SourceDescriptor {
        SourceDescriptor {
            format,
            width: 1920,
            height: 1080,
            reported_hdr,
        }
    }

    #[test]
    fn processing_line_covers_all_source_modes() {
        assert_eq!(
            processing_description(descriptor(SourceFormat::Rgba16Float, true), &config(&[])),
            "maxRGB Reinhard tonemapping (HDR to SDR, sdrWhite=240 nits)"
        );
        assert_eq!(
            processing_description(
                descriptor(SourceFormat::Rgba16Float, true),
                &config(&["--no-tonemap"])
            ),
            "None (--no-tonemap, HDR values may clip)"
        );
        assert_eq!(
            processing_description(descriptor(SourceFormat::Bgra8, true), &config(&[])),
            "Linear to sRGB gamma (SDR container from HDR source)"
        );
        assert_eq!(
            processing_description(descriptor(SourceFormat::Bgra8, false), &config(&[])),
            "Passthrough (SDR)"
        );
    }

    #[test]
    fn shared_state_failure_is_reported_once() {
        let shared = SharedState::new();
        shared.record_failure(MirrorError::FirstFrameTimeout);
        shared.record_failure(MirrorError::AccessLost);
        assert!(matches!(
            shared.take_failure(),
            Some(MirrorError::FirstFrameTimeout)
        ));
        assert!(shared.take_failure().is_none());
    }

    #[test]
    fn buffer_ready_flag_pairs_release_with_acquire() {
        let shared = SharedState::new();
        assert!(!shared.is_buffer_ready());
        shared.mark_buffer_ready();
        assert!(shared.is_buffer_ready());
    }
}
