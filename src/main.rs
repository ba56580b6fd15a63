use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use joyroute::device::device_exists_at;
use joyroute::{DeviceHandle, Event, Settings};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    install_error_hooks()?;
    let mut settings = Settings::load_or_default()?;
    if let Some(arg) = std::env::args().nth(1) {
        settings.device_index = arg
            .parse()
            .map_err(|e| eyre!("Invalid device index '{}': {}", arg, e))?;
    }
    setup_logging(Level::from_str(&settings.log_level).unwrap_or(Level::INFO));
    info!("Using settings: {:?}", settings);

    if !device_exists_at(&settings.device_path_prefix, settings.device_index) {
        return Err(eyre!("Joystick {} not found", settings.device_index));
    }

    let mut handle = DeviceHandle::connect(&settings).await?;
    log_capabilities(&handle);

    let mut listeners = JoinSet::new();
    for number in handle.capabilities().button_numbers() {
        listeners.spawn(listen(format!("button {number} closed"), handle.on_close(number)?));
        listeners.spawn(listen(format!("button {number} opened"), handle.on_open(number)?));
    }
    for hat in handle.capabilities().hat_numbers() {
        match handle.on_hat_move(hat) {
            Ok(receiver) => {
                listeners.spawn(listen(format!("hat {hat}"), receiver));
            }
            Err(e) => warn!("Skipping hat {}: {}", hat, e),
        }
    }

    let router = handle.spawn_router()?;
    info!("Listening on {} channels", listeners.len());

    while listeners.join_next().await.is_some() {}
    router.await?;
    info!("Joystick {} disconnected", settings.device_index);
    Ok(())
}

fn install_error_hooks() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn log_capabilities(handle: &DeviceHandle) {
    let caps = handle.capabilities();
    info!(
        "Connected: {} buttons, {} hats",
        caps.button_count(),
        caps.hat_count()
    );
    let mut buttons: Vec<_> = caps.buttons.iter().collect();
    buttons.sort_by_key(|(_, button)| button.number);
    for (index, button) in buttons {
        info!(
            "  button {} (index {}) pressed={}",
            button.number, index, button.pressed
        );
    }
    let mut axes: Vec<_> = caps.hat_axes.iter().collect();
    axes.sort_by_key(|(_, axis)| (axis.hat_number, axis.axis_number));
    for (index, axis) in axes {
        info!(
            "  hat {} axis {} (index {}) value={:.3}",
            axis.hat_number, axis.axis_number, index, axis.value
        );
    }
}

async fn listen(label: String, mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        let now = Local::now().format("%H:%M:%S%.3f");
        match event {
            Event::Button { pressed, when, .. } => {
                info!("[{}] {} pressed={} (device {:?})", now, label, pressed, when)
            }
            Event::HatPosition { x, y, when, .. } => {
                info!("[{}] {} x={:.3} y={:.3} (device {:?})", now, label, x, y, when)
            }
            Event::HatAxis { value, when, .. } => {
                info!("[{}] {} value={:.3} (device {:?})", now, label, value, when)
            }
        }
    }
}
