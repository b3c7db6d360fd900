mod menu;

use std::error::Error;

use log::error;

use common::calibration::MAX_DISTANCE;
use common::config::{load_config, RobotConfig};
use common::logger;

const CONFIG_PATH: &str = "configs/robot.toml";
/// Supervisor steps in the networked demo, at 50 Hz.
const DEMO_STEPS: usize = 500;

fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => load_config(CONFIG_PATH).unwrap_or_else(|e| {
            eprintln!("{}: {}, using built-in defaults", CONFIG_PATH, e);
            RobotConfig::default()
        }),
    };
    logger::init(config.logging.level_filter()?)?;

    println!("===========================================");
    println!("Welcome to Differential Drive Wheel Control");
    println!("===========================================");

    loop {
        menu::show_menu();

        let outcome = match menu::get_user_choice() {
            Some(1) => run_threaded_session(&config),
            Some(2) => run_server(&config),
            Some(3) => {
                calibration_report(&config);
                Ok(())
            }
            Some(4) => run_network_demo(&config),
            Some(5) => {
                println!("Goodbye!");
                break;
            }
            _ => {
                println!("Invalid choice. Please select 1-5.");
                continue;
            }
        };
        if let Err(e) = outcome {
            error!("{}", e);
        }
        menu::wait_for_enter();
    }
    Ok(())
}

fn run_threaded_session(config: &RobotConfig) -> Result<(), Box<dyn Error>> {
    println!("\n=== Running Threaded Scripted Session ===");
    println!(
        "Configuration: {} ms control period, {} seconds, {} script steps",
        config.control.period_ms,
        config.session.duration_secs,
        config.session.script.len()
    );

    let report = threaded_impl::run_session(config)?;
    let records = report.recorder.records();

    println!("\n=== Session Results ===");
    println!("Total ticks: {}", records.len());
    println!("Late ticks: {}", report.recorder.missed());
    println!(
        "Tick compute: mean {:?}, max {:?}",
        report.timing.mean, report.timing.max
    );
    for record in records.iter().step_by(50) {
        println!(
            "t={:>5}ms ref=({:>6.1}, {:>6.1}) speed=({:>6.1}, {:>6.1}) ticks=({:>5}, {:>5}) dir=({:?}, {:?})",
            record.cycle_id * config.control.period_ms,
            record.reference_left,
            record.reference_right,
            record.speed_left,
            record.speed_right,
            record.ticks_left,
            record.ticks_right,
            record.direction_left,
            record.direction_right
        );
    }

    report.recorder.save_to_csv(&config.session.telemetry_csv)?;
    println!("Telemetry saved to {}", config.session.telemetry_csv);
    Ok(())
}

fn run_server(config: &RobotConfig) -> Result<(), Box<dyn Error>> {
    println!("\n=== UDP Robot Server ===");
    println!("Robot address: {}", config.network.robot_addr);
    println!("Send $END* to stop the server.");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_impl::serve_sim(config))?;
    Ok(())
}

fn calibration_report(config: &RobotConfig) {
    println!("\n=== IR Calibration ===");
    let calibrations = match config.ir.calibrations() {
        Ok(c) => c,
        Err(e) => {
            println!("Calibration failed: {}", e);
            return;
        }
    };
    for (sensor, (cal, voltages)) in calibrations.iter().zip(&config.ir.voltages).enumerate() {
        println!(
            "sensor {}: alpha={:.3} beta={:.3} gamma={:.4}",
            sensor, cal.alpha, cal.beta, cal.gamma
        );
        for (d, v) in config.ir.distances.iter().zip(voltages) {
            println!("    d={:>5.1} v={:>6.1} -> {:.3}", d, v, cal.distance(*v));
        }
        println!(
            "    readings below {:.1} report {}",
            cal.voltage_at(MAX_DISTANCE),
            MAX_DISTANCE
        );
    }
}

fn run_network_demo(config: &RobotConfig) -> Result<(), Box<dyn Error>> {
    println!("\n=== Networked Obstacle-Avoidance Demo ===");
    println!("Simulated robot starts facing a wall; the supervisor talks to it over UDP.");

    let rt = tokio::runtime::Runtime::new()?;
    let (events, supervisor) = rt.block_on(async_impl::run_demo(config, DEMO_STEPS))?;

    println!("Events: {:?}", events);
    println!("Final behavior state: {:?}", supervisor.state());
    Ok(())
}
