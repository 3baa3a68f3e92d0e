//! Liquid Cooling Control CLI
//!
//! Command-line interface for monitoring and controlling liquidctl-driven
//! coolers, editing profiles and safety/curve settings, and running the
//! closed-loop control daemon.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use liquid_cooling_control::config::{DaemonSettings, SourceCurve};
use liquid_cooling_control::cooling::{ControlLoop, ControlSnapshot};
use liquid_cooling_control::device::{
    CommandNegotiator, DeviceAdapter, LiquidctlCli, StatusPoller, with_timeout,
};
use liquid_cooling_control::protocol::{Channel, LinkState};
use liquid_cooling_control::storage::ProfileStore;
use liquid_cooling_control::utils::parsing::{
    parse_channel, parse_curve_points, parse_percent, parse_targets,
};
use liquid_cooling_control::utils::sensors::{SensorProvider, SystemSensorProvider, SystemSensors};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Liquid Cooling Control Tool
#[derive(Parser, Debug)]
#[command(name = "liquid-cooling-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device description passed to `liquidctl -m`
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Settings file (default: OS config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// liquidctl executable
    #[arg(long, global = true)]
    liquidctl: Option<String>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show current device status and temperatures
    Status,

    /// Diagnostic: show CPU/GPU readings and all platform sensors
    Sensors,

    /// Run the device initialization sequence
    Initialize,

    /// Set a fixed fan speed
    SetFan {
        /// Channel: fanN or fans
        #[arg(default_value = "fans")]
        channel: String,

        /// Speed percentage (0-100)
        percent: String,
    },

    /// Set a fixed pump speed
    SetPump {
        /// Speed percentage (0-100)
        percent: String,
    },

    /// Manage named profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Show or change safety settings
    Safety {
        /// Enable emergency boost
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable emergency boost
        #[arg(long)]
        disable: bool,

        /// CPU threshold in °C
        #[arg(long)]
        cpu: Option<f32>,

        /// Coolant threshold in °C
        #[arg(long)]
        water: Option<f32>,

        /// Release margin in °C
        #[arg(long)]
        margin: Option<f32>,

        /// Raise an alarm while the CPU is over threshold
        #[arg(long)]
        alarm: Option<bool>,
    },

    /// Show or change temperature curves
    Curve {
        /// Enable curve control
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable curve control
        #[arg(long)]
        disable: bool,

        /// CPU curve points, e.g. 30:20,60:60,80:100
        #[arg(long)]
        cpu: Option<String>,

        /// Coolant curve points, e.g. 30:20,40:60,50:100
        #[arg(long)]
        water: Option<String>,

        /// Drive the pump from the curve as well
        #[arg(long)]
        apply_pump: Option<bool>,
    },

    /// Export all settings to a file
    Export {
        path: PathBuf,
    },

    /// Import all settings from a file
    Import {
        path: PathBuf,
    },

    /// Run the closed-loop control daemon
    Daemon {
        /// Profile to apply at start
        #[arg(short, long)]
        profile: Option<String>,

        /// Tick interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// List saved profiles
    List,

    /// Show one profile's targets
    Show { name: String },

    /// Save a profile, e.g. `save quiet fan1=30,fan2=30,pump=60`
    Save { name: String, targets: String },

    /// Delete a profile
    Delete { name: String },

    /// Mark a profile active (applied by the daemon)
    Select { name: String },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(&log_level)
        .init();

    let store = Arc::new(open_store(args.config.as_ref())?);
    let settings = resolve_settings(&store, &args)?;

    match args.command {
        Command::Status => cmd_status(&settings).await,
        Command::Sensors => cmd_sensors(&settings).await,
        Command::Initialize => cmd_initialize(&settings).await,
        Command::SetFan { channel, percent } => {
            let channel = parse_channel(&channel)?;
            if !channel.is_fan() {
                bail!("'{}' is not a fan channel", channel);
            }
            cmd_set_speed(&settings, channel, parse_percent(&percent)?).await
        }
        Command::SetPump { percent } => {
            cmd_set_speed(&settings, Channel::Pump, parse_percent(&percent)?).await
        }
        Command::Profile { action } => cmd_profile(&store, action),
        Command::Safety {
            enable,
            disable,
            cpu,
            water,
            margin,
            alarm,
        } => cmd_safety(&store, toggle(enable, disable), cpu, water, margin, alarm),
        Command::Curve {
            enable,
            disable,
            cpu,
            water,
            apply_pump,
        } => cmd_curve(&store, toggle(enable, disable), cpu, water, apply_pump),
        Command::Export { path } => {
            store.export_to(&path).context("Failed to export settings")?;
            println!("✅ Settings exported to {}", path.display());
            Ok(())
        }
        Command::Import { path } => {
            store.import_from(&path).context("Failed to import settings")?;
            println!("✅ Settings imported from {}", path.display());
            Ok(())
        }
        Command::Daemon {
            profile,
            interval_ms,
        } => {
            let mut settings = settings;
            if let Some(ms) = interval_ms {
                settings.tick_interval_ms = ms;
                settings.validate()?;
            }
            cmd_daemon(store, settings, profile).await
        }
    }
}

fn open_store(path: Option<&PathBuf>) -> Result<ProfileStore> {
    match path {
        Some(path) => Ok(ProfileStore::open(path)),
        None => ProfileStore::open_default().context("Failed to locate config directory"),
    }
}

/// Persisted daemon settings with CLI overrides applied.
fn resolve_settings(store: &ProfileStore, args: &Args) -> Result<DaemonSettings> {
    let mut settings = store.document().daemon;
    if let Some(device) = &args.device {
        settings.device = Some(device.clone());
    }
    if let Some(program) = &args.liquidctl {
        settings.liquidctl_path = program.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn toggle(enable: bool, disable: bool) -> Option<bool> {
    match (enable, disable) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn device_name(settings: &DaemonSettings) -> String {
    settings.device.clone().unwrap_or_default()
}

// =============================================================================
// Device Commands
// =============================================================================

async fn cmd_status(settings: &DaemonSettings) -> Result<()> {
    let adapter = Arc::new(LiquidctlCli::from_settings(settings));
    let sensors = Arc::new(SystemSensorProvider::new(settings.command_timeout()));
    let mut poller = StatusPoller::new(
        adapter,
        sensors,
        device_name(settings),
        settings.command_timeout(),
        1,
    );

    let outcome = poller.poll().await;
    if outcome.status.link == LinkState::Offline {
        bail!("Failed to read device status (is liquidctl installed and the device connected?)");
    }
    print!("{}", outcome.status);
    print_temp("CPU", outcome.sensors.cpu_temp);
    print_temp("GPU", outcome.sensors.gpu_temp);
    Ok(())
}

async fn cmd_sensors(settings: &DaemonSettings) -> Result<()> {
    let provider = SystemSensorProvider::new(settings.command_timeout());
    println!("🔍 Reading temperature sources...");
    match provider.cpu_temp().await {
        Ok(temp) => print_temp("CPU", temp),
        Err(e) => println!("   CPU: ❌ {}", e),
    }
    match provider.gpu_temp().await {
        Ok(temp) => print_temp("GPU", temp),
        Err(e) => println!("   GPU: ❌ {}", e),
    }

    let platform = SystemSensors::new();
    let all = platform.list_all();
    if all.is_empty() {
        println!("\nNo platform sensors detected.");
        return Ok(());
    }

    println!("\n✅ Found {} platform sensors:\n", all.len());
    println!("{:<40} | {:<10} | {:<10}", "Label", "Temp", "Critical");
    println!("{}", "─".repeat(66));
    for sensor in &all {
        let temp = sensor
            .temperature
            .map(|t| format!("{:.1}°C", t))
            .unwrap_or_else(|| "-".to_string());
        let critical = sensor
            .critical
            .map(|c| format!("{:.1}°C", c))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<40} | {:<10} | {}", sensor.label, temp, critical);
    }
    Ok(())
}

async fn cmd_initialize(settings: &DaemonSettings) -> Result<()> {
    let adapter = LiquidctlCli::from_settings(settings);
    let device = device_name(settings);
    with_timeout(
        settings.command_timeout(),
        "device initialization",
        adapter.initialize(&device),
    )
    .await
    .context("Failed to initialize device")?;
    println!("✅ Device initialized");
    Ok(())
}

async fn cmd_set_speed(settings: &DaemonSettings, channel: Channel, percent: u8) -> Result<()> {
    let adapter = Arc::new(LiquidctlCli::from_settings(settings));
    let mut negotiator = CommandNegotiator::new(adapter, settings.command_timeout());
    let device = device_name(settings);

    let dialect = negotiator
        .dispatch(&device, channel, percent)
        .await
        .with_context(|| format!("Failed to set {} to {}%", channel, percent))?;
    println!("✅ {} set to {}% ({})", channel, percent, dialect);
    Ok(())
}

fn print_temp(label: &str, temp: Option<f32>) {
    match temp {
        Some(t) => println!("   {}: {:.1}°C", label, t),
        None => println!("   {}: N/A", label),
    }
}

// =============================================================================
// Settings Commands
// =============================================================================

fn cmd_profile(store: &ProfileStore, action: ProfileAction) -> Result<()> {
    match action {
        ProfileAction::List => {
            let names = store.list_names();
            if names.is_empty() {
                println!("No profiles saved.");
                return Ok(());
            }
            let active = store.active_name();
            for name in names {
                let marker = if active.as_deref() == Some(name.as_str()) { "👉" } else { "  " };
                println!("{} {}", marker, name);
            }
        }
        ProfileAction::Show { name } => {
            let targets = store
                .load(&name)
                .with_context(|| format!("Failed to load profile '{}'", name))?;
            println!("📊 Profile '{}':", name);
            for (channel, percent) in &targets {
                println!("   {:<6} {:>3}%", channel.to_string(), percent);
            }
        }
        ProfileAction::Save { name, targets } => {
            let targets = parse_targets(&targets)?;
            store.save(&name, &targets).context("Failed to save profile")?;
            println!("✅ Profile '{}' saved ({} channels)", name.trim(), targets.len());
        }
        ProfileAction::Delete { name } => {
            store.delete(&name).context("Failed to delete profile")?;
            println!("✅ Profile '{}' deleted", name);
        }
        ProfileAction::Select { name } => {
            store
                .set_active(Some(&name))
                .with_context(|| format!("Failed to select profile '{}'", name))?;
            println!("✅ Profile '{}' is now active", name);
        }
    }
    Ok(())
}

fn cmd_safety(
    store: &ProfileStore,
    enabled: Option<bool>,
    cpu: Option<f32>,
    water: Option<f32>,
    margin: Option<f32>,
    alarm: Option<bool>,
) -> Result<()> {
    let mut safety = store.document().safety;
    let changed = enabled.is_some()
        || cpu.is_some()
        || water.is_some()
        || margin.is_some()
        || alarm.is_some();

    if let Some(enabled) = enabled {
        safety.enabled = enabled;
    }
    if let Some(cpu) = cpu {
        safety.cpu_threshold = cpu;
    }
    if let Some(water) = water {
        safety.water_threshold = water;
    }
    if let Some(margin) = margin {
        safety.hysteresis_margin = margin;
    }
    if let Some(alarm) = alarm {
        safety.alarm_enabled = alarm;
    }

    if changed {
        store.update_safety(&safety).context("Invalid safety settings")?;
        println!("✅ Safety settings saved");
    }

    println!("🛡️  Safety: {}", if safety.enabled { "enabled" } else { "disabled" });
    println!("   CPU threshold:   {:.1}°C", safety.cpu_threshold);
    println!("   Water threshold: {:.1}°C", safety.water_threshold);
    println!("   Release margin:  {:.1}°C", safety.hysteresis_margin);
    println!("   Alarm:           {}", if safety.alarm_enabled { "on" } else { "off" });
    Ok(())
}

fn cmd_curve(
    store: &ProfileStore,
    enabled: Option<bool>,
    cpu: Option<String>,
    water: Option<String>,
    apply_pump: Option<bool>,
) -> Result<()> {
    let mut curves = store.document().curves;
    let changed = enabled.is_some() || cpu.is_some() || water.is_some() || apply_pump.is_some();

    if let Some(enabled) = enabled {
        curves.enabled = enabled;
    }
    if let Some(points) = cpu {
        curves.cpu.points = parse_curve_points(&points)?;
    }
    if let Some(points) = water {
        curves.water.points = parse_curve_points(&points)?;
    }
    if let Some(apply_pump) = apply_pump {
        curves.apply_to_pump = apply_pump;
    }

    if changed {
        store.update_curves(&curves).context("Invalid curve settings")?;
        println!("✅ Curve settings saved");
    }

    println!("📈 Curves: {}", if curves.enabled { "enabled" } else { "disabled" });
    println!("   Apply to pump: {}", if curves.apply_to_pump { "yes" } else { "no" });
    print_curve("CPU", &curves.cpu);
    print_curve("Water", &curves.water);
    Ok(())
}

fn print_curve(label: &str, curve: &SourceCurve) {
    let points: Vec<String> = curve
        .points
        .iter()
        .map(|p| format!("{:.0}°C→{}%", p.temp, p.percent))
        .collect();
    let warning = if curve.is_monotonic() { "" } else { "  ⚠️ decreasing" };
    println!("   {:<6} {}{}", label, points.join("  "), warning);
}

// =============================================================================
// Daemon
// =============================================================================

async fn cmd_daemon(
    store: Arc<ProfileStore>,
    settings: DaemonSettings,
    profile: Option<String>,
) -> Result<()> {
    let adapter = Arc::new(LiquidctlCli::from_settings(&settings));
    let sensors = Arc::new(SystemSensorProvider::new(settings.command_timeout()));
    let interval = settings.tick_interval();
    let device = device_name(&settings);

    let (control, handle) = ControlLoop::new(adapter, sensors, Arc::clone(&store), settings);
    if let Some(name) = &profile {
        handle
            .select_profile(name)
            .with_context(|| format!("Failed to load profile '{}'", name))?;
    }

    // Setup Ctrl+C handler
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    println!("🌡️  Cooling Daemon Started (Ctrl+C to stop)");
    println!("{}", "━".repeat(50));
    println!("   Device:   {}", if device.is_empty() { "(auto)" } else { &device });
    println!("   Profile:  {}", handle.active_profile().as_deref().unwrap_or("(manual)"));
    println!("   Interval: {}ms", interval.as_millis());
    println!("   Config:   {}", store.path().display());
    println!("{}", "━".repeat(50));
    println!();

    let mut snapshots = handle.subscribe();
    let printer = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = Arc::clone(&snapshots.borrow_and_update());
            print_tick(&snapshot);
        }
    });

    control.initialize().await;
    control.run(shutdown_rx).await;
    printer.abort();

    let last = handle.get_snapshot();
    println!("\n✅ Cooling daemon stopped after {} ticks.", last.tick);
    Ok(())
}

fn print_tick(snapshot: &ControlSnapshot) {
    let water = snapshot
        .status
        .water_temp
        .map(|t| format!("{:.1}°C", t))
        .unwrap_or_else(|| "--".to_string());
    let cpu = snapshot
        .sensors
        .cpu_temp
        .map(|t| format!("{:.0}°C", t))
        .unwrap_or_else(|| "--".to_string());
    let pump = match (snapshot.targets.get(&Channel::Pump), snapshot.status.pump_rpm) {
        (Some(target), Some(rpm)) => format!("{:3}% ({} RPM)", target, rpm),
        (Some(target), None) => format!("{:3}%", target),
        (None, _) => "n/a".to_string(),
    };
    let fans: Vec<String> = snapshot
        .targets
        .iter()
        .filter(|(channel, _)| matches!(channel, Channel::Fan(_)))
        .map(|(_, target)| format!("{}%", target))
        .collect();

    let mut flags = String::new();
    if snapshot.is_boosted() {
        flags.push_str(" 🚨 BOOST");
    }
    if snapshot.alarm {
        flags.push_str(" 🔔 ALARM");
    }
    if snapshot.status.link == LinkState::Offline {
        flags.push_str(" ⚠️ OFFLINE");
    } else if !snapshot.status.is_fresh() {
        flags.push_str(" (stale)");
    }
    if snapshot.dialect_unresolved {
        flags.push_str(" ❌ no dialect");
    }

    println!(
        "[{:4}] 💧 {} | 🔥 {} | Pump: {} | Fans: [{}]{}",
        snapshot.tick,
        water,
        cpu,
        pump,
        fans.join(" "),
        flags
    );
}
