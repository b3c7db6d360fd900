use common::config::{load_config, RobotConfig};
use common::metrics::TickRecord;
use common::sim::SharedPlant;
use common::{logger, DriveController, Direction, TelemetryRecorder};
use criterion::{black_box, Criterion};
use std::env;
use std::error::Error;

fn analyze_session(records: &[TickRecord], name: &str) {
    if records.is_empty() {
        println!("{}: No records to analyze", name);
        return;
    }

    let total = records.len();
    let missed = records.iter().filter(|r| !r.deadline_met).count();
    let compliance = (1.0 - missed as f64 / total as f64) * 100.0;

    let compute_us: Vec<f64> = records.iter().map(|r| r.compute_ns as f64 / 1000.0).collect();
    let avg = compute_us.iter().sum::<f64>() / total as f64;
    let min = compute_us.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = compute_us.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    println!("\n=== {} Session Analysis ===", name);
    println!("Total ticks: {}", total);
    println!("Deadline compliance: {:.2}% ({} missed)", compliance, missed);
    println!("Tick compute (μs): avg={:.2}, min={:.2}, max={:.2}", avg, min, max);

    // time spent without a direction estimate, per wheel
    let unknown_left = records.iter().filter(|r| r.direction_left == Direction::Unknown).count();
    let unknown_right = records.iter().filter(|r| r.direction_right == Direction::Unknown).count();
    println!(
        "Direction unknown: left {:.1}%, right {:.1}%",
        unknown_left as f64 / total as f64 * 100.0,
        unknown_right as f64 / total as f64 * 100.0
    );

    // tracking error over ticks where a non-zero reference was held
    let tracking: Vec<f64> = records
        .iter()
        .filter(|r| r.reference_left != 0.0)
        .map(|r| (r.reference_left - r.speed_left).abs())
        .collect();
    if !tracking.is_empty() {
        let mean = tracking.iter().sum::<f64>() / tracking.len() as f64;
        println!("Left wheel mean |reference - speed|: {:.2} ticks/s", mean);
    }

    if let Some(last) = records.last() {
        println!("Final ticks: ({}, {})", last.ticks_left, last.ticks_right);
    }
}

fn benchmark_tick(c: &mut Criterion, config: &RobotConfig) -> Result<(), Box<dyn Error>> {
    let plant = SharedPlant::new(config.sim);
    let period = config.control.period_ms as f64 / 1000.0;
    let mut drive = DriveController::new(plant.lockstep_encoder(period), plant.motor(), &config.control)?;
    drive.run(50.0, -50.0);

    c.bench_function("drive_tick", |b| {
        b.iter(|| {
            drive.tick();
            black_box(drive.ticks());
        });
    });
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [session|analyze <csv>] [--criterion]");
        eprintln!("Example: benchmark_runner configs/robot.toml session");
        eprintln!("Example: benchmark_runner configs/robot.toml analyze results/session.csv");
        eprintln!("Example: benchmark_runner configs/robot.toml --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let mode = args.get(2).map(|s| s.as_str()).unwrap_or("session");
    let use_criterion = args.iter().any(|a| a == "--criterion");

    let config = load_config(config_path)?;
    // quiet while measuring
    let level = if use_criterion { log::LevelFilter::Warn } else { config.logging.level_filter()? };
    logger::init(level)?;

    println!("========================================");
    println!("Wheel Speed Control Benchmark");
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Control period: {} ms", config.control.period_ms);
    println!("Session duration: {} seconds", config.session.duration_secs);
    println!("Anti-windup: {:?}", config.control.pid.anti_windup);
    println!("========================================\n");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(50)
            .measurement_time(std::time::Duration::from_secs(5));
        benchmark_tick(&mut criterion, &config)?;
        criterion.final_summary();
        println!("\nCheck the target/criterion directory for detailed HTML reports.");
        return Ok(());
    }

    match mode {
        "analyze" => {
            let path = args
                .get(3)
                .map(String::as_str)
                .unwrap_or(config.session.telemetry_csv.as_str());
            let records = TelemetryRecorder::load_csv(path)?;
            analyze_session(&records, path);
        }
        _ => {
            println!("Running threaded session...");
            let start = std::time::Instant::now();
            let report = threaded_impl::run_session(&config)?;
            println!("Session completed in {:.2} seconds", start.elapsed().as_secs_f64());

            analyze_session(&report.recorder.records(), "THREADED");
            let diagnostics = report.diagnostics.snapshot();
            println!(
                "Latches: {}, releases: {}, late ticks: {}",
                diagnostics.latches, diagnostics.releases, diagnostics.late_ticks
            );

            report.recorder.save_to_csv(&config.session.telemetry_csv)?;
            println!("Telemetry saved to {}", config.session.telemetry_csv);
        }
    }

    Ok(())
}
