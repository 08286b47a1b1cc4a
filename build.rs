use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    println!("cargo:rerun-if-changed=wifi_config.h");
    println!("cargo:rerun-if-changed=partitions.csv");

    // Read WiFi configuration if it exists
    let wifi_config_path = "wifi_config.h";
    let contents = if Path::new(wifi_config_path).exists() {
        fs::read_to_string(wifi_config_path)?
    } else {
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
        String::new()
    };

    println!("cargo:rustc-env=WIFI_SSID={}", define_value(&contents, "WIFI_SSID"));
    println!("cargo:rustc-env=WIFI_PASSWORD={}", define_value(&contents, "WIFI_PASSWORD"));

    Ok(())
}

// Value of `#define NAME "value"`, or empty
fn define_value(contents: &str, name: &str) -> String {
    let directive = format!("#define {}", name);
    contents
        .lines()
        .find(|l| l.trim_start().starts_with(&directive))
        .and_then(|l| l.split('"').nth(1))
        .unwrap_or_default()
        .to_string()
}
