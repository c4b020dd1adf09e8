//! Peripheral assignments for the link UART on the application controller.
//!
//! Single source of truth: the UART adapter reads these rather than
//! hard-coding numbers. Change a pin here and it propagates everywhere.

/// UART peripheral wired to the radio controller.
pub const LINK_UART_PORT: u8 = 1;
/// Application controller TX, radio controller RX.
pub const LINK_UART_TX_GPIO: i32 = 17;
/// Application controller RX, radio controller TX.
pub const LINK_UART_RX_GPIO: i32 = 18;
/// Both ends run 8N1 without flow control.
pub const LINK_UART_BAUD: u32 = 230_400;

/// Driver ring buffer sizes.
pub const LINK_UART_RX_BUF: usize = 2048;
pub const LINK_UART_TX_BUF: usize = 2048;
