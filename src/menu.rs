use std::io::{self, Write};

pub fn show_menu() {
    println!("\n===========================================");
    println!("Differential Drive Wheel Control");
    println!("===========================================");
    println!("Select an option:");
    println!("1. Threaded Scripted Session (simulated robot)");
    println!("2. UDP Robot Server (simulated robot)");
    println!("3. IR Calibration Report");
    println!("4. Networked Obstacle-Avoidance Demo");
    println!("5. Exit");
    println!("===========================================");
    print!("Choice (1-5): ");
    let _ = io::stdout().flush();
}

pub fn get_user_choice() -> Option<u32> {
    let mut input = String::new();
    io::stdin().read_line(&mut input).ok()?;
    input.trim().parse::<u32>().ok()
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);
}
