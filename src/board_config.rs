// src/board_config.rs
//
// Motor-side pin map. The port drives these through the PAC, so the board
// struct exists to take ownership of them away from the HAL.

use embassy_stm32::peripherals::*;
use embassy_stm32::Peri;
use embassy_stm32::Peripherals;

/// Sequire H7 V2: four motors on TIM3, DMA1 streams 4..7.
pub struct SequireH7V2Motors {
    pub motor_tim: Peri<'static, TIM3>,
    pub motor1_pin: Peri<'static, PB4>, // M1 = TIM3_CH1
    pub motor2_pin: Peri<'static, PB5>, // M2 = TIM3_CH2
    pub motor3_pin: Peri<'static, PB0>, // M3 = TIM3_CH3
    pub motor4_pin: Peri<'static, PB1>, // M4 = TIM3_CH4
    pub motor1_dma: Peri<'static, DMA1_CH4>, // also TIM3_UP in burst mode
    pub motor2_dma: Peri<'static, DMA1_CH5>,
    pub motor3_dma: Peri<'static, DMA1_CH6>,
    pub motor4_dma: Peri<'static, DMA1_CH7>,
    pub status_led: Peri<'static, PC13>,
}

impl SequireH7V2Motors {
    pub fn new(p: Peripherals) -> Self {
        Self {
            motor_tim: p.TIM3,
            motor1_pin: p.PB4,
            motor2_pin: p.PB5,
            motor3_pin: p.PB0,
            motor4_pin: p.PB1,
            motor1_dma: p.DMA1_CH4,
            motor2_dma: p.DMA1_CH5,
            motor3_dma: p.DMA1_CH6,
            motor4_dma: p.DMA1_CH7,
            status_led: p.PC13,
        }
    }
}
