use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use cockpit_core::{
    camera::CameraClient, sim::SimulatedBackend, CockpitSession, DiscoveryBackend,
};
use control_link::{ChannelState, ControlChannel};
use shared::domain::{CarId, ConnectionStatus};
use tracing::info;

mod config;

use config::Settings;

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Demo,
    Drive {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    Camera {
        ip: String,
        #[arg(long, default_value = "status")]
        action: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let settings = config::load_settings();

    match cli.command {
        Command::Demo => run_demo().await,
        Command::Drive { seconds } => run_drive(&settings, seconds).await,
        Command::Camera { ip, action } => run_camera(&settings, &ip, &action).await,
    }
}

async fn run_demo() -> Result<()> {
    let backend = Arc::new(SimulatedBackend::new());
    let session =
        CockpitSession::new_with_backend(Arc::clone(&backend) as Arc<dyn DiscoveryBackend>);

    let _roster_feed = session.store().subscribe_cars(|update| {
        println!("roster ({} cars):", update.count);
        for car in &update.cars {
            println!(
                "  #{:<3} {:<18} {:<28} {}:{}",
                car.number, car.driver, car.team, car.ip, car.port
            );
        }
    });

    session.start().await?;
    println!("discovery: {}", session.bridge().status_message());

    for car in SimulatedBackend::fixture_roster() {
        backend.announce_car(car);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let focus = CarId("car-16".to_string());
    backend.set_connection_status(&focus, ConnectionStatus::Connected);
    session.selection().select(focus.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!(
        "selected {} ({:?})",
        focus.0,
        session.selection().connection_status()
    );

    backend.mark_offline(&CarId("car-1".to_string()));
    tokio::time::sleep(Duration::from_millis(300)).await;

    backend.remove_car(&CarId("car-55".to_string()));
    tokio::time::sleep(Duration::from_millis(300)).await;

    session.shutdown().await;
    println!("discovery: {}", session.bridge().status_message());
    Ok(())
}

async fn run_drive(settings: &Settings, seconds: u64) -> Result<()> {
    let channel = ControlChannel::new(settings.control_config());
    info!(url = %settings.control_url, seconds, "driving");
    channel.start();

    let mut states = channel.subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            println!("control link: {state:?}");
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let started = tokio::time::Instant::now();
    while started.elapsed() < Duration::from_secs(seconds) {
        ticker.tick().await;
        if channel.state() == ChannelState::Failed {
            anyhow::bail!(
                "control link failed: is the bridge at {} running?",
                settings.control_url
            );
        }
        let t = started.elapsed().as_secs_f32();
        let steering = (t * std::f32::consts::TAU * 0.25).sin();
        channel.send_sample(steering, 0.3).await;
    }

    channel.stop().await;
    Ok(())
}

async fn run_camera(settings: &Settings, ip: &str, action: &str) -> Result<()> {
    let client = CameraClient::with_port(settings.camera_port);
    let status = match action {
        "start" => client.start_stream(ip).await,
        "stop" => client.stop_stream(ip).await,
        "status" => client.stream_status(ip).await,
        other => anyhow::bail!("unknown camera action '{other}', expected start|stop|status"),
    };
    println!("camera {ip}: {status:?}");
    Ok(())
}
