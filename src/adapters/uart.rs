//! UART transport over the ESP-IDF driver.
//!
//! Reads never block: the I/O thread polls and sleeps on its own timer, so
//! the driver is asked only for bytes already in its RX ring.

use esp_idf_hal::delay::{NON_BLOCK, TickType};
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::uart::{self, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::sys::EspError;
use log::info;

use crate::link::Transport;
use crate::pins;

/// How long `flush` waits for the TX FIFO to drain.
const FLUSH_TIMEOUT_MS: u64 = 50;

pub struct UartTransport {
    driver: UartDriver<'static>,
}

impl UartTransport {
    /// Install the driver on the link pins from [`pins`].
    pub fn new<U: uart::Uart>(
        uart: impl Peripheral<P = U> + 'static,
        tx: AnyIOPin,
        rx: AnyIOPin,
    ) -> Result<Self, EspError> {
        let config = uart::config::Config::default()
            .baudrate(Hertz(pins::LINK_UART_BAUD))
            .rx_fifo_size(pins::LINK_UART_RX_BUF)
            .tx_fifo_size(pins::LINK_UART_TX_BUF);
        let driver = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &config,
        )?;
        info!(
            "uart: link on UART{} TX=GPIO{} RX=GPIO{} baud={}",
            pins::LINK_UART_PORT,
            pins::LINK_UART_TX_GPIO,
            pins::LINK_UART_RX_GPIO,
            pins::LINK_UART_BAUD
        );
        Ok(Self { driver })
    }
}

impl Transport for UartTransport {
    type Error = EspError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.driver.read(buf, NON_BLOCK)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, EspError> {
        self.driver.write(data)
    }

    fn flush(&mut self) -> Result<(), EspError> {
        self.driver
            .wait_tx_done(TickType::new_millis(FLUSH_TIMEOUT_MS).ticks())
    }

    fn available(&self) -> bool {
        self.driver.remaining_read().is_ok_and(|n| n > 0)
    }
}
