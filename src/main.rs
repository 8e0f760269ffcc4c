//! Tank reporter firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    use std::time::Instant;

    use esp_idf_hal::gpio::{IOPin, OutputPin};
    use esp_idf_hal::ledc::{config::TimerConfig, LedcTimerDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;

    use tank_reporter_esp32::app::App;
    use tank_reporter_esp32::device::{
        self, GpioLevelSensor, LedcIndicator, NullFirmwareUpdate, StdConsole,
    };
    use tank_reporter_esp32::net::{EspMqttSession, EspWifiLink};
    use tank_reporter_esp32::settings::{nvs::NvsStorage, SettingsStore};

    log::info!("=== Tank reporter {} starting ===", tank_reporter_esp32::FIRMWARE_VERSION);

    let peripherals = Peripherals::take().expect("Failed to take peripherals");
    let sysloop = EspSystemEventLoop::take().expect("Failed to take system event loop");

    let storage = NvsStorage::new().expect("Failed to initialize NVS");
    let mut store = SettingsStore::new(storage);
    store.load();
    if store.is_valid() {
        println!("{}", store.listing());
    }

    let mut wifi =
        EspWifiLink::new(peripherals.modem, sysloop).expect("Failed to initialize WiFi");
    let mut mqtt = EspMqttSession::new();

    let mut sensor = GpioLevelSensor::new(peripherals.pins.gpio4.downgrade())
        .expect("Failed to initialize sensor pin");

    let ledc_timer = LedcTimerDriver::new(peripherals.ledc.timer0, &TimerConfig::default())
        .expect("Failed to initialize LEDC timer");
    let mut indicator = LedcIndicator::new(
        &ledc_timer,
        peripherals.ledc.channel0,
        peripherals.pins.gpio12.downgrade_output(),
        peripherals.ledc.channel1,
        peripherals.pins.gpio13.downgrade_output(),
        peripherals.pins.gpio2.downgrade_output(),
    )
    .expect("Failed to initialize indicator LEDs");

    let mut console = StdConsole::new();
    let mut updater = NullFirmwareUpdate;

    let mut app = App::new(store);
    loop {
        let outcome = app.tick(
            Instant::now(),
            &mut wifi,
            &mut mqtt,
            &mut sensor,
            &mut indicator,
            &mut console,
            &mut updater,
        );
        std::thread::sleep(outcome.delay);
        if outcome.restart {
            device::restart();
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo test' for host testing of the core.");
}
