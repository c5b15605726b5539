#![cfg_attr(target_arch = "riscv32", no_std)]
#![cfg_attr(target_arch = "riscv32", no_main)]

#[cfg(target_arch = "riscv32")]
mod firmware {
    use core::cell::RefCell;

    use embassy_net::{Config, Stack, StackResources};
    use embassy_sync::blocking_mutex::Mutex;
    use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
    use esp_hal::clock::CpuClock;
    use esp_hal::ledc::{LSGlobalClkSource, Ledc};
    use esp_hal::rng::Rng;
    use esp_hal::timer::timg::TimerGroup;
    use esp_hal_embassy::Executor;
    use esp_println::println;
    use esp_wifi::wifi::{self, WifiController, WifiDevice};
    use log::{error, info};
    use static_cell::StaticCell;

    use light_tone_board::api::{RequestRouter, SharedSensor};
    use light_tone_board::board::{AdcLightSensor, EspStats, LedcBuzzer};
    use light_tone_board::config;
    use light_tone_board::playback::PlaybackScheduler;
    use light_tone_board::sensor::{Calibration, SensorReader};
    use light_tone_board::server::HttpServer;
    use light_tone_board::wifi::WiFiManager;

    // Add app descriptor for espflash compatibility
    esp_bootloader_esp_idf::esp_app_desc!();

    type Router = RequestRouter<'static, AdcLightSensor, LedcBuzzer, EspStats>;

    // Static cells for embassy components
    static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
    static STACK_RESOURCES: StaticCell<StackResources<{ config::HTTP_WORKERS + 2 }>> =
        StaticCell::new();
    static SENSOR_CELL: StaticCell<SharedSensor<AdcLightSensor>> = StaticCell::new();
    static PLAYBACK_CELL: StaticCell<PlaybackScheduler<LedcBuzzer>> = StaticCell::new();
    static STATS_CELL: StaticCell<EspStats> = StaticCell::new();
    static ROUTER_CELL: StaticCell<Router> = StaticCell::new();

    // Static executor for embassy tasks
    static EXECUTOR: StaticCell<Executor> = StaticCell::new();

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        println!("[PANIC] {}", info);
        loop {}
    }

    // Embassy task to run the network stack
    #[embassy_executor::task]
    async fn net_task(mut runner: embassy_net::Runner<'static, WifiDevice<'static>>) -> ! {
        runner.run().await
    }

    #[embassy_executor::task]
    async fn wifi_task(controller: WifiController<'static>, stack: Stack<'static>) -> ! {
        WiFiManager::new(controller, stack).run().await
    }

    #[embassy_executor::task]
    async fn playback_task(scheduler: &'static PlaybackScheduler<LedcBuzzer>) -> ! {
        scheduler.run().await
    }

    #[embassy_executor::task(pool_size = config::HTTP_WORKERS)]
    async fn http_task(stack: Stack<'static>, router: &'static Router, worker_id: usize) -> ! {
        HttpServer::new(stack, config::HTTP_PORT)
            .run(router, worker_id)
            .await
    }

    #[esp_hal::main]
    fn main() -> ! {
        let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
        let peripherals = esp_hal::init(config);

        // Initialize heap allocator for WiFi and JSON bodies (72KB)
        esp_alloc::heap_allocator!(size: 72 * 1024);

        esp_println::logger::init_logger(log::LevelFilter::Info);
        info!(
            "[MAIN] light-tone-board {} ({})",
            light_tone_board::VERSION,
            config::DEVICE_ID
        );

        // Initialize embassy time system
        let timer_group0 = TimerGroup::new(peripherals.TIMG0);
        esp_hal_embassy::init(timer_group0.timer0);

        // Light sensor on ADC1
        let mut adc_config = AdcConfig::new();
        let light_pin = adc_config.enable_pin(peripherals.GPIO2, Attenuation::_11dB);
        let adc = Adc::new(peripherals.ADC1, adc_config);
        let sensor = SENSOR_CELL.init(Mutex::new(RefCell::new(SensorReader::new(
            AdcLightSensor::new(adc, light_pin),
            Calibration::DEFAULT,
        ))));
        info!(
            "[SENSOR] GPIO{} calibrated {}..{}",
            config::LIGHT_SENSOR_PIN,
            config::RAW_MIN,
            config::RAW_MAX
        );

        // Buzzer on LEDC channel 0
        let mut ledc = Ledc::new(peripherals.LEDC);
        ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);
        let playback = PLAYBACK_CELL.init(PlaybackScheduler::new(LedcBuzzer::new(
            ledc,
            peripherals.GPIO6,
        )));
        info!("[BUZZ] buzzer ready on GPIO{}", config::BUZZER_PIN);

        // Initialize WiFi driver
        let timer_group1 = TimerGroup::new(peripherals.TIMG1);
        let mut rng = Rng::new(peripherals.RNG);
        let seed = (rng.random() as u64) << 32 | rng.random() as u64;
        let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
            Ok(init) => WIFI_INIT_CELL.init(init),
            Err(err) => {
                error!("[WIFI] driver init failed: {:?}", err);
                panic!("WiFi driver initialization failed");
            }
        };
        let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init, peripherals.WIFI) {
            Ok(pair) => pair,
            Err(err) => {
                error!("[WIFI] controller init failed: {:?}", err);
                panic!("WiFi controller initialization failed");
            }
        };

        // Create embassy-net stack with DHCP configuration
        let (stack, runner) = embassy_net::new(
            wifi_interfaces.sta,
            Config::dhcpv4(Default::default()),
            STACK_RESOURCES.init(StackResources::new()),
            seed,
        );
        info!("[WIFI] Embassy-net stack created with DHCP configuration");

        let stats = STATS_CELL.init(EspStats);
        let router = ROUTER_CELL.init(RequestRouter::new(
            sensor,
            playback,
            stats,
            config::DEVICE_ID,
        ));

        // Initialize embassy executor and run tasks
        let executor = EXECUTOR.init(Executor::new());
        executor.run(|spawner| {
            info!("[MAIN] Spawning network task...");
            if let Err(err) = spawner.spawn(net_task(runner)) {
                error!("[MAIN] Failed to spawn network task: {:?}", err);
            }

            info!("[MAIN] Spawning WiFi task...");
            if let Err(err) = spawner.spawn(wifi_task(wifi_controller, stack)) {
                error!("[MAIN] Failed to spawn WiFi task: {:?}", err);
            }

            info!("[MAIN] Spawning playback task...");
            if let Err(err) = spawner.spawn(playback_task(playback)) {
                error!("[MAIN] Failed to spawn playback task: {:?}", err);
            }

            for worker_id in 0..config::HTTP_WORKERS {
                info!("[MAIN] Spawning HTTP worker {}...", worker_id);
                if let Err(err) = spawner.spawn(http_task(stack, router, worker_id)) {
                    error!("[MAIN] Failed to spawn HTTP worker {}: {:?}", worker_id, err);
                }
            }
        });
    }
}

#[cfg(not(target_arch = "riscv32"))]
fn main() {
    eprintln!(
        "light-tone-board {} is firmware for the ESP32-C3 (riscv32imc-unknown-none-elf); \
         run the library tests on the host instead.",
        light_tone_board::VERSION
    );
}
