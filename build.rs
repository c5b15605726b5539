fn main() {
    // Load .env file for WiFi, identity and calibration configuration
    load_env_config();

    // Linker scripts only make sense for the ESP32-C3 firmware image; host builds
    // (unit tests of the protocol and playback logic) link normally.
    if std::env::var("CARGO_CFG_TARGET_ARCH").as_deref() == Ok("riscv32") {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

const DEFAULT_DEVICE_ID: &str = "pico-w-unknown";
const DEFAULT_RAW_MIN: u16 = 600;
const DEFAULT_RAW_MAX: u16 = 65338;

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    // Tell cargo to rerun if environment variables change
    for key in [
        "WIFI_SSID",
        "WIFI_PASSWORD",
        "DEVICE_ID",
        "LIGHT_RAW_MIN",
        "LIGHT_RAW_MAX",
    ] {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    // Note: We need to handle the case where env vars are set to empty strings
    let read = |key: &str| {
        env::var(key)
            .unwrap_or_else(|_| String::new())
            .trim()
            .to_string()
    };

    let wifi_ssid = read("WIFI_SSID");
    let wifi_password = read("WIFI_PASSWORD");
    let mut device_id = read("DEVICE_ID");
    if device_id.is_empty() {
        device_id = DEFAULT_DEVICE_ID.to_string();
    }

    let raw_min = parse_calibration("LIGHT_RAW_MIN", &read("LIGHT_RAW_MIN"), DEFAULT_RAW_MIN);
    let raw_max = parse_calibration("LIGHT_RAW_MAX", &read("LIGHT_RAW_MAX"), DEFAULT_RAW_MAX);
    if raw_min >= raw_max {
        panic!(
            "LIGHT_RAW_MIN ({}) must be strictly below LIGHT_RAW_MAX ({})",
            raw_min, raw_max
        );
    }

    // Set environment variables for the compilation
    println!("cargo:rustc-env=WIFI_SSID={}", wifi_ssid);
    println!("cargo:rustc-env=WIFI_PASSWORD={}", wifi_password);
    println!("cargo:rustc-env=DEVICE_ID={}", device_id);
    println!("cargo:rustc-env=LIGHT_RAW_MIN={}", raw_min);
    println!("cargo:rustc-env=LIGHT_RAW_MAX={}", raw_max);

    // Print status
    if wifi_ssid.is_empty() {
        println!("cargo:warning=WIFI_SSID is empty - WiFi will not be configured");
    }
    if wifi_password.is_empty() {
        println!("cargo:warning=WIFI_PASSWORD is empty - open network assumed");
    }
}

fn parse_calibration(key: &str, value: &str, default: u16) -> u16 {
    if value.is_empty() {
        return default;
    }
    match value.parse::<u16>() {
        Ok(v) => v,
        Err(e) => panic!("{} must be an integer in 0..=65535, got {:?}: {}", key, value, e),
    }
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_defmt_timestamp" => {
                    eprintln!();
                    eprintln!("💡 `defmt` not found - make sure `defmt.x` is added as a linker script and you have included `use defmt_rtt as _;`");
                    eprintln!();
                }
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
