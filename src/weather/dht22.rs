//! DHT22 bit-bang protocol over a GPIO line.
//!
//! One read: claim the pin as output, hold it low 18ms, release high 30µs,
//! switch to input, time 40 bits by high-pulse duration (>40µs is a 1),
//! checksum-verify, then decode humidity (×0.1%) and signed temperature
//! (×0.1°C, sign bit in the high byte's MSB).
//!
//! This is inherently a real-time-sensitive blocking operation — it runs on
//! a blocking thread (`spawn_blocking`), never on the async executor.

use std::time::{Duration, Instant};

use gpio_cdev::{Chip, LineRequestFlags};
use thiserror::Error;

const GPIO_CHIP: &str = "/dev/gpiochip0";
const RESET_LOW_MS: u64 = 18;
const RESET_HIGH_US: u64 = 30;
const HIGH_PULSE_ONE_THRESHOLD_US: u128 = 40;
const BIT_COUNT: usize = 40;
const PIN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum Dht22Error {
    #[error("gpio error: {0}")]
    Gpio(#[from] gpio_cdev::Error),
    #[error("checksum mismatch: got {got:#04x}, expected {expected:#04x}")]
    ChecksumMismatch { got: u8, expected: u8 },
    #[error("timed out waiting for sensor response")]
    Timeout,
}

#[derive(Debug, Clone, Copy)]
pub struct RawReading {
    pub humidity_pct: f64,
    pub temperature_c: f64,
}

/// Perform one blocking DHT22 read on `pin` of `GPIO_CHIP`.
pub fn read_blocking(pin: u32) -> Result<RawReading, Dht22Error> {
    let mut chip = Chip::new(GPIO_CHIP)?;

    // 1. Claim the pin as output, pull low 18ms, then high 30us — the
    //    start-of-frame handshake.
    {
        let line = chip.get_line(pin)?;
        let handle = line.request(LineRequestFlags::OUTPUT, 0, "trafficwatch-dht22")?;
        handle.set_value(0)?;
        std::thread::sleep(Duration::from_millis(RESET_LOW_MS));
        handle.set_value(1)?;
        std::thread::sleep(Duration::from_micros(RESET_HIGH_US));
        // handle drops here, releasing the output claim before re-requesting as input.
    }

    // 2. Switch to input and time each bit's high-pulse duration.
    let line = chip.get_line(pin)?;
    let handle = line.request(LineRequestFlags::INPUT, 0, "trafficwatch-dht22")?;

    let mut bits = Vec::with_capacity(BIT_COUNT);
    let deadline = Instant::now() + PIN_TIMEOUT;
    for _ in 0..BIT_COUNT {
        wait_for_level(&handle, 0, deadline)?; // preceding low separator
        wait_for_level(&handle, 1, deadline)?;
        let start = Instant::now();
        wait_for_level(&handle, 0, deadline)?;
        let high_us = start.elapsed().as_micros();
        bits.push(high_us > HIGH_PULSE_ONE_THRESHOLD_US);
    }

    let bytes = bits_to_bytes(&bits);
    let checksum = bytes[0]
        .wrapping_add(bytes[1])
        .wrapping_add(bytes[2])
        .wrapping_add(bytes[3]);
    if checksum != bytes[4] {
        return Err(Dht22Error::ChecksumMismatch {
            got: checksum,
            expected: bytes[4],
        });
    }

    let humidity_raw = ((bytes[0] as u16) << 8) | bytes[1] as u16;
    let humidity_pct = humidity_raw as f64 * 0.1;

    let temp_raw = ((bytes[2] as u16 & 0x7f) << 8) | bytes[3] as u16;
    let sign = if bytes[2] & 0x80 != 0 { -1.0 } else { 1.0 };
    let temperature_c = sign * temp_raw as f64 * 0.1;

    Ok(RawReading {
        humidity_pct,
        temperature_c,
    })
}

fn wait_for_level(
    handle: &gpio_cdev::LineHandle,
    level: u8,
    deadline: Instant,
) -> Result<(), Dht22Error> {
    loop {
        if handle.get_value()? == level {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Dht22Error::Timeout);
        }
        std::hint::spin_loop();
    }
}

fn bits_to_bytes(bits: &[bool]) -> [u8; 5] {
    let mut bytes = [0u8; 5];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_positive_temperature() {
        // humidity=55.0% (0x022e), temp=23.1C (0x00e7 -> positive sign)
        let bits_from_bytes = |bytes: [u8; 4]| -> [bool; 32] {
            let mut bits = [false; 32];
            for (i, b) in bytes.iter().enumerate() {
                for bit in 0..8 {
                    bits[i * 8 + bit] = (b >> (7 - bit)) & 1 == 1;
                }
            }
            bits
        };
        let bytes = [0x02, 0x2e, 0x00, 0xe7];
        let mut bits = Vec::from(bits_from_bytes(bytes));
        let checksum = bytes[0]
            .wrapping_add(bytes[1])
            .wrapping_add(bytes[2])
            .wrapping_add(bytes[3]);
        bits.extend((0..8).map(|i| (checksum >> (7 - i)) & 1 == 1));

        let decoded = bits_to_bytes(&bits);
        assert_eq!(decoded, [0x02, 0x2e, 0x00, 0xe7, checksum]);

        let humidity_raw = ((decoded[0] as u16) << 8) | decoded[1] as u16;
        assert!((humidity_raw as f64 * 0.1 - 55.0).abs() < 1e-9);

        let temp_raw = ((decoded[2] as u16 & 0x7f) << 8) | decoded[3] as u16;
        assert!((temp_raw as f64 * 0.1 - 23.1).abs() < 1e-9);
    }

    #[test]
    fn negative_temperature_sign_bit() {
        let bytes = [0x01, 0x90, 0x80, 0x32]; // temp sign bit set -> negative
        let checksum = bytes[0]
            .wrapping_add(bytes[1])
            .wrapping_add(bytes[2])
            .wrapping_add(bytes[3]);
        assert_eq!(bytes[2] & 0x80, 0x80);
        let temp_raw = ((bytes[2] as u16 & 0x7f) << 8) | bytes[3] as u16;
        let temp_c = -1.0 * temp_raw as f64 * 0.1;
        assert!(temp_c < 0.0);
        let _ = checksum;
    }
}
