#![no_main]
#![no_std]

use core::cell::RefCell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::exception;
use defmt::{info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Ticker, Timer};
use panic_probe as _;

use fade_rpm::board_config::SequireH7V2Motors as BoardPins;
use fade_rpm::port::stm32h7::Stm32h7Port;
use fade_rpm::{Bank, DshotDriver, LoopTiming, RpmFilter, StoredConfig};

/// TIM3 kernel clock: APB1 96 MHz, doubled for timers.
const TIM3_CLOCK_HZ: u32 = 192_000_000;
/// Core clock, for the SysTick reload.
const SYSCLK_HZ: u32 = 384_000_000;
/// DMA completion poll rate. Well inside the ~30 µs before the ESC answers.
const DMA_POLL_HZ: u32 = 250_000;
/// DShot throttle floor once the ESCs are armed.
const IDLE_THROTTLE: u16 = 48;

struct MotorLoop {
    driver: DshotDriver<Stm32h7Port>,
    filter: RpmFilter,
}

// =================== SHARED STATE ===================
static MOTORS: Mutex<CriticalSectionRawMutex, RefCell<Option<MotorLoop>>> =
    Mutex::new(RefCell::new(None));

// =================== INTERRUPTS ===================

#[exception]
fn SysTick() {
    let done = Stm32h7Port::completed_motors();
    if done == 0 {
        return;
    }
    MOTORS.lock(|cell| {
        if let Some(state) = cell.borrow_mut().as_mut() {
            for motor in 0..8 {
                if done & (1 << motor) != 0 {
                    state.driver.on_transfer_complete(motor);
                }
            }
        }
    });
}

/// Resets the MCU so the FC recovers from crashes.
#[exception]
unsafe fn HardFault(_frame: &cortex_m_rt::ExceptionFrame) -> ! {
    cortex_m::peripheral::SCB::sys_reset();
}

// =================== TASKS ===================

#[embassy_executor::task]
async fn led_task(mut led: Output<'static>) {
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}

/// One motor frame per PID loop: collect telemetry, retune notches, send.
#[embassy_executor::task]
async fn motor_task(pid_looptime_us: u32) {
    let mut ticker = Ticker::every(Duration::from_micros(pid_looptime_us as u64));
    loop {
        MOTORS.lock(|cell| {
            if let Some(state) = cell.borrow_mut().as_mut() {
                let MotorLoop { driver, filter } = state;
                driver.start_frame();
                filter.update(|motor| driver.telemetry(motor));
                for motor in 0..driver.motor_count() {
                    driver.write_motor_command(motor, IDLE_THROTTLE);
                }
                driver.complete_frame();
            }
        });
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn stats_task() {
    let mut ticker = Ticker::every(Duration::from_secs(1));
    loop {
        ticker.next().await;
        MOTORS.lock(|cell| {
            if let Some(state) = cell.borrow().as_ref() {
                let stats = state.driver.stats();
                let rpm = state.filter.debug();
                info!(
                    "link: read {} invalid {} overrun {} | motor Hz {} {} {} {}",
                    stats.read_done,
                    stats.invalid_packets,
                    stats.overruns,
                    rpm.motor_hz[0],
                    rpm.motor_hz[1],
                    rpm.motor_hz[2],
                    rpm.motor_hz[3],
                );
            }
        });
    }
}

// =================== MAIN ===================
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(clock_config());
    let pins = BoardPins::new(p);

    let led = Output::new(pins.status_led, Level::Low, Speed::Low);

    // TODO: read the record from the config flash sector once the flash
    // layout is fixed; defaults until then.
    let stored = StoredConfig::default();
    let timing = LoopTiming::default();

    let driver = DshotDriver::new(Stm32h7Port::new(TIM3_CLOCK_HZ), &stored.motor, &timing);
    let filter = match RpmFilter::new(&stored.rpm, &stored.motor, &timing) {
        Ok(filter) => filter,
        Err(e) => {
            warn!("rpm filter config rejected: {}, using defaults", e);
            let defaults = StoredConfig::default();
            unwrap!(RpmFilter::new(&defaults.rpm, &defaults.motor, &timing))
        }
    };
    info!(
        "rpm filter: {} retunes per loop, gyro notches off above {} Hz",
        filter.updates_per_tick(),
        filter.deactivate_hz(Bank::Gyro)
    );
    MOTORS.lock(|cell| *cell.borrow_mut() = Some(MotorLoop { driver, filter }));

    let mut core = unwrap!(cortex_m::Peripherals::take());
    core.SYST.set_clock_source(SystClkSource::Core);
    core.SYST.set_reload(SYSCLK_HZ / DMA_POLL_HZ - 1);
    core.SYST.clear_current();
    core.SYST.enable_interrupt();
    core.SYST.enable_counter();

    spawner.spawn(unwrap!(led_task(led)));
    spawner.spawn(unwrap!(motor_task(timing.pid_looptime_us())));
    spawner.spawn(unwrap!(stats_task()));
}

// =================== CLOCK CONFIG ===================
pub fn clock_config() -> embassy_stm32::Config {
    use embassy_stm32::rcc::*;

    let mut config = embassy_stm32::Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz(8_000_000),
        mode: HseMode::Oscillator,
    });
    config.rcc.hsi = Some(HSIPrescaler::DIV1);
    config.rcc.csi = true;
    config.rcc.pll1 = Some(Pll {
        source: PllSource::HSI,
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL48,
        divp: Some(PllDiv::DIV2),
        divq: Some(PllDiv::DIV16),
        divr: None,
    });
    config.rcc.sys = Sysclk::PLL1_P; // 384 MHz
    config.rcc.ahb_pre = AHBPrescaler::DIV2; // 192 MHz
    config.rcc.apb1_pre = APBPrescaler::DIV2; // 96 MHz, TIM3 at 192 MHz
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config.rcc.apb3_pre = APBPrescaler::DIV2;
    config.rcc.apb4_pre = APBPrescaler::DIV2;
    config.rcc.voltage_scale = VoltageScale::Scale1;
    config
}
