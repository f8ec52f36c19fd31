use std::env;
use std::path::PathBuf;
use xr_overlay::config::AppConfig;

fn main() {
    if let Err(err) = run() {
        eprintln!("[config] error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let output_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/xr_overlay.json"));

    let config = AppConfig::default();
    config.validate()?;
    config.write_json(&output_path)?;
    println!(
        "[config] wrote defaults for {} to {}",
        config.app.name,
        output_path.display()
    );
    Ok(())
}
