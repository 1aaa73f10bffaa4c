use clap::Parser;
use resonance_meter::session::CONNECTION_TIMEOUT_MS;
use resonance_meter::{capture, now_ms, server, AppState};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// How often the sliding-window rates are recomputed.
const RATE_TICK_MS: u64 = 100;
/// How often the debounced cache is checked for a pending write.
const CACHE_SCAN_MS: u64 = 500;
/// Fragment/connection garbage collection cadence.
const GC_TICK_MS: u64 = 10_000;
/// A session idle this long gets archived in the background.
const AUTOSAVE_IDLE_MS: u64 = 10_000;

#[derive(Parser, Debug)]
#[command(
    name = "resonance-meter",
    version,
    about = "Blue Protocol: Star Resonance real-time damage meter"
)]
struct Cli {
    /// Capture device index, as printed by --list-devices
    device: Option<usize>,

    /// Log level filter (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// WebSocket listen port for the dashboard
    #[arg(long, default_value_t = 8989)]
    port: u16,

    /// Directory for settings, caches and session archives
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn print_devices(devices: &[pcap::Device]) {
    println!("Welcome to use Damage Counter for Star Resonance!");
    for (i, device) in devices.iter().enumerate() {
        let label = device.desc.as_deref().unwrap_or(&device.name);
        println!("{}.\t{}", i, label);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_str()),
    )
    .init();

    let devices = match pcap::Device::list() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Failed to enumerate capture devices: {}", e);
            process::exit(1);
        }
    };

    if cli.list_devices || cli.device.is_none() {
        print_devices(&devices);
        if cli.list_devices {
            return;
        }
    }

    let index = match cli.device {
        Some(index) => index,
        None => {
            eprintln!("Please pass the number of the device used for packet capture.");
            process::exit(1);
        }
    };
    let device = match devices.into_iter().nth(index) {
        Some(device) => device,
        None => {
            eprintln!("Cannot find device {}!", index);
            process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(&cli.data_dir));

    if let Err(e) = capture::sniffer::spawn(state.clone(), device) {
        log::error!("Failed to start capture threads: {}", e);
        process::exit(1);
    }

    tokio::spawn(rate_tick(state.clone()));
    tokio::spawn(cache_flush_tick(state.clone()));
    tokio::spawn(gc_tick(state.clone()));
    tokio::spawn(autosave_tick(state.clone()));

    log::info!("Welcome!");
    log::info!("Attempting to find the game server, please wait!");

    tokio::select! {
        result = server::ws::run(state.clone(), cli.port) => {
            if let Err(e) = result {
                log::error!("Web server failed: {}", e);
                shutdown_flush(&state);
                process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Saving user cache...");
            shutdown_flush(&state);
        }
    }
}

/// Pending throttled writes go to disk synchronously before exit.
fn shutdown_flush(state: &AppState) {
    let mut session = state.session.lock().unwrap();
    session.archive_session(&state.history);
    if let Some(flush) = session.users.cache.take_flush_forced() {
        flush.write();
    }
}

async fn rate_tick(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_millis(RATE_TICK_MS));
    loop {
        interval.tick().await;
        if state.paused.load(Ordering::Relaxed) {
            continue;
        }
        state.session.lock().unwrap().users.update_all_realtime();
    }
}

async fn cache_flush_tick(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_millis(CACHE_SCAN_MS));
    loop {
        interval.tick().await;
        // Serialize under the lock, write outside it
        let pending = state.session.lock().unwrap().users.cache.take_flush(now_ms());
        if let Some(flush) = pending {
            flush.write();
        }
    }
}

async fn gc_tick(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_millis(GC_TICK_MS));
    loop {
        interval.tick().await;
        let now = now_ms();
        let mut session = state.session.lock().unwrap();

        let cleared = session.fragments.sweep(now);
        if cleared > 0 {
            log::debug!("Cleared {} expired IP fragment caches", cleared);
        }

        let last_data = session.tcp.last_data_ms();
        if session.server.is_some()
            && last_data > 0
            && now.saturating_sub(last_data) > CONNECTION_TIMEOUT_MS
        {
            log::warn!("Cannot capture the next packet! Is the game closed or disconnected?");
            session.clear_connection();
            if state.settings.lock().unwrap().auto_clear_on_timeout {
                session.archive_session(&state.history);
                session.users.clear_all();
            }
        }
    }
}

async fn autosave_tick(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_millis(AUTOSAVE_IDLE_MS));
    loop {
        interval.tick().await;
        let now = now_ms();

        // Copy the dump under the lock, write outside it
        let dump = {
            let mut session = state.session.lock().unwrap();
            if session.users.needs_save()
                && now.saturating_sub(session.users.last_record_ms()) >= AUTOSAVE_IDLE_MS
            {
                let dump = session.users.session_dump();
                session.users.mark_saved();
                dump
            } else {
                None
            }
        };

        if let Some(dump) = dump {
            match state.history.save(&dump) {
                Ok(dir) => log::debug!("Session auto-saved to {}", dir.display()),
                Err(e) => log::error!("Failed to auto-save session: {}", e),
            }
        }
    }
}
