//! Networked robot: a tokio UDP server that owns and ticks the robot, a
//! client proxy for the base station, and the obstacle-avoidance runner
//! that drives one through the other.

pub mod client;
pub mod server;

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::time::{interval, MissedTickBehavior};

use common::behavior::{Event, SpeedCommand, Supervisor};
use common::config::RobotConfig;
use common::sim::{Plant, SharedPlant, SimEncoder, SimMotor, SimRangeSensor};
use common::{Robot, SharedDiagnostics};

pub use client::{ClientError, RobotClient};
pub use server::{RobotServer, ServerError};

/// Supervisor step rate when driving over the network.
pub const BEHAVIOR_PERIOD: Duration = Duration::from_millis(20);

/// Simulated encoder ticks for one full turn in place.
const TICKS_PER_TURN: f64 = 120.0;
/// Head-on range while facing the wall in the demo world.
const WALL_DISTANCE: f64 = 5.0;
const OPEN_DISTANCE: f64 = 100.0;

pub type SimRobot = Robot<SimEncoder, SimMotor, SimRangeSensor>;
pub type SimServer = RobotServer<SimEncoder, SimMotor, SimRangeSensor>;

/// Build a server around a simulated robot that advances one control
/// period per tick.
pub async fn bind_sim_server(
    config: &RobotConfig,
    addr: &str,
) -> Result<(SimServer, SharedPlant), ServerError> {
    config.validate()?;
    let calibrations = config.ir.calibrations()?;
    let plant = SharedPlant::from_plant(Plant::new(config.sim).with_calibrations(calibrations));
    let period = Duration::from_millis(config.control.period_ms);
    let robot = Robot::new(
        plant.lockstep_encoder(period.as_secs_f64()),
        plant.motor(),
        plant.range_sensor(),
        config,
    )?;
    let server = RobotServer::bind(addr, robot, period, Arc::new(SharedDiagnostics::default())).await?;
    Ok((server, plant))
}

/// Serve a simulated robot on `network.robot_addr` until a client sends END.
pub async fn serve_sim(config: &RobotConfig) -> Result<(), ServerError> {
    let (server, _plant) = bind_sim_server(config, &config.network.robot_addr).await?;
    let robot = server.serve().await?;
    info!("server stopped, final ticks {:?}", robot.ticks());
    Ok(())
}

/// Step the behavior supervisor against a remote robot, then stop it.
/// Returns every event the supervisor fired.
pub async fn run_supervised(
    client: &RobotClient,
    supervisor: &mut Supervisor,
    steps: usize,
    period: Duration,
) -> Result<Vec<Event>, ClientError> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut events = Vec::new();

    for step in 0..steps {
        ticker.tick().await;
        let distances = client.ir_distances().await?;
        let (SpeedCommand { left, right }, event) = supervisor.execute(&distances);
        client.set_speed(left, right).await?;
        if let Some(event) = event {
            info!("step {}: {:?}, now {:?}", step, event, supervisor.state());
            events.push(event);
        }
    }

    client.set_speed(0.0, 0.0).await?;
    Ok(events)
}

fn facing_wall(heading_ticks: f64) -> bool {
    (heading_ticks / TICKS_PER_TURN * TAU).cos() > 0.5
}

/// Obstacle-avoidance demo on loopback: a simulated robot that starts out
/// facing a wall, driven by the supervisor through a real UDP client.
pub async fn run_demo(
    config: &RobotConfig,
    steps: usize,
) -> Result<(Vec<Event>, Supervisor), Box<dyn std::error::Error>> {
    let (server, plant) = bind_sim_server(config, "127.0.0.1:0").await?;
    drive_demo(server, plant, config, "127.0.0.1:0", steps).await
}

async fn drive_demo(
    server: SimServer,
    plant: SharedPlant,
    config: &RobotConfig,
    client_addr: &str,
    steps: usize,
) -> Result<(Vec<Event>, Supervisor), Box<dyn std::error::Error>> {
    let robot_addr = server.local_addr()?;
    let server_task = tokio::spawn(server.serve());

    let world = {
        let plant = plant.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(10));
            loop {
                ticker.tick().await;
                let heading = plant.lock().heading_ticks();
                let ahead = if facing_wall(heading) { WALL_DISTANCE } else { OPEN_DISTANCE };
                plant.set_obstacles([OPEN_DISTANCE, OPEN_DISTANCE, ahead, ahead, OPEN_DISTANCE]);
            }
        })
    };

    let connected = RobotClient::connect(
        client_addr,
        robot_addr,
        Duration::from_millis(config.network.reply_timeout_ms),
        config.network.retries,
    )
    .await;
    let client = match connected {
        Ok(client) => client,
        Err(err) => {
            world.abort();
            server_task.abort();
            return Err(err.into());
        }
    };

    let mut supervisor = Supervisor::new(config.behavior);
    let outcome = run_supervised(&client, &mut supervisor, steps, BEHAVIOR_PERIOD).await;

    let ended = client.end().await;
    world.abort();
    if let Err(err) = ended {
        server_task.abort();
        return Err(err.into());
    }
    let robot = server_task.await??;
    info!(
        "demo finished at heading {:.1} ticks, robot ticks {:?}",
        plant.lock().heading_ticks(),
        robot.ticks()
    );

    Ok((outcome?, supervisor))
}
