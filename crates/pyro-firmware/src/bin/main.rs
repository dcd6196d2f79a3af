#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::join::join;
use embassy_net::StackResources;
use embassy_time::{Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{LevelFilter, error, info};
use static_cell::{ConstStaticCell, StaticCell};

use pyro_core::app_state::AppError;
use pyro_core::config::Config;
use pyro_core::control_loop::Controller;
use pyro_core::sensors::{ConversionMode, ThermocoupleType};
use pyro_core::telemetry::AnyTransport;
use pyro_core::telemetry::tls::{TLS_READ_BUFFER_LEN, TLS_WRITE_BUFFER_LEN, TlsBuffers};
use pyro_firmware::hardware::{ThermocouplePins, create_i2c_bus, create_thermocouple};
use pyro_firmware::net_link::TcpLink;
use pyro_firmware::oled::OledPanel;
use pyro_firmware::secrets;
use pyro_firmware::wifi::EspWifiRadio;

/// The field thermocouple is type R (platinum/rhodium)
const THERMOCOUPLE_TYPE: ThermocoupleType = ThermocoupleType::R;

const TCP_BUFFER_LEN: usize = 1024;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static CONFIG: StaticCell<Config<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static TLS_READ: ConstStaticCell<[u8; TLS_READ_BUFFER_LEN]> =
    ConstStaticCell::new([0; TLS_READ_BUFFER_LEN]);
static TLS_WRITE: ConstStaticCell<[u8; TLS_WRITE_BUFFER_LEN]> =
    ConstStaticCell::new([0; TLS_WRITE_BUFFER_LEN]);

/// Log a fatal startup error and park the device.
async fn halt(error: AppError) -> ! {
    error!("Fatal: {}", error);
    error!("Halted, reset the device to retry");
    loop {
        Timer::after_secs(60).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(LevelFilter::Info);

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("pyro-rs booting");

    let config: &'static Config<'static> = match secrets::device_config() {
        Ok(config) => CONFIG.init(config),
        Err(e) => halt(e.into()).await,
    };
    info!(
        "Telemetry via {}{} to {}:{}, {} known network(s)",
        config.telemetry.transport.label(),
        if config.telemetry.encrypted { "+TLS" } else { "" },
        config.telemetry.host,
        config.telemetry.port(),
        config.network.known_networks.len()
    );

    // 1. Display
    let i2c = create_i2c_bus(peripherals.I2C0, peripherals.GPIO21, peripherals.GPIO22);
    let panel = match OledPanel::new(i2c) {
        Ok(panel) => panel,
        Err(e) => halt(AppError::display(e)).await,
    };

    // 2. Thermocouple
    let mut thermocouple = create_thermocouple(
        peripherals.SPI2,
        ThermocouplePins {
            sck: peripherals.GPIO13,
            sdi: peripherals.GPIO14,
            sdo: peripherals.GPIO12,
            cs: peripherals.GPIO27,
            drdy: peripherals.GPIO15,
        },
        config.timing.sensor_ready_timeout(),
    );
    if let Err(e) = thermocouple
        .init(THERMOCOUPLE_TYPE, ConversionMode::Continuous)
        .await
    {
        halt(e.into()).await;
    }

    // 3. WiFi and the IP stack
    let radio_init = esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller");
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(&radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );

    // 4. Telemetry link
    let mut rx_buffer = [0u8; TCP_BUFFER_LEN];
    let mut tx_buffer = [0u8; TCP_BUFFER_LEN];
    let link = TcpLink::new(stack, &mut rx_buffer, &mut tx_buffer);
    let tls = config.telemetry.encrypted.then(|| {
        let tls_seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
        TlsBuffers::new(TLS_READ.take(), TLS_WRITE.take(), tls_seed)
    });
    let transport = match AnyTransport::from_config(link, &config.telemetry, tls) {
        Ok(transport) => transport,
        Err(e) => halt(e.into()).await,
    };

    let radio = EspWifiRadio::new(wifi_controller, stack);
    let mut controller = Controller::new(
        thermocouple,
        panel,
        radio,
        transport,
        config,
        Instant::now(),
    );

    let app = async {
        if let Err(e) = controller.start(Instant::now()).await {
            halt(e).await;
        }
        controller.run().await
    };

    let _ = join(net_runner.run(), app).await;
    unreachable!()
}
