// GuardBand - MPU6050 IMU Driver
//
// Register-level driver over the shared I2C bus.  Returns raw register
// values; scaling to g and deg/s happens in the signal conditioner so the
// host replay tool sees exactly what the firmware sees.

use guardband::config::*;
use guardband::events::RawImuReading;

use super::{lock_bus, SharedBus};

// MPU6050 register addresses
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_CONFIG: u8 = 0x1A;
const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B; // Start of 14-byte sensor burst
const REG_WHO_AM_I: u8 = 0x75;
const WHO_AM_I_EXPECTED: u8 = 0x68;

pub struct Mpu6050 {
    bus: SharedBus,
}

impl Mpu6050 {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }

    /// Probe WHO_AM_I.  Any bus error reads as "not connected".
    pub fn is_connected(&self) -> bool {
        let Ok(mut bus) = lock_bus(self.bus) else {
            return false;
        };
        let mut buf = [0u8; 1];
        match bus.write_read(I2C_ADDR_MPU6050, &[REG_WHO_AM_I], &mut buf, I2C_TIMEOUT_TICKS) {
            Ok(()) => buf[0] == WHO_AM_I_EXPECTED,
            Err(_) => false,
        }
    }

    /// Wake the sensor: accel +-2 g, gyro +-250 deg/s, DLPF 21 Hz.
    pub fn init(&self) -> anyhow::Result<()> {
        let mut bus = lock_bus(self.bus)?;

        bus.write(I2C_ADDR_MPU6050, &[REG_PWR_MGMT_1, 0x00], I2C_TIMEOUT_TICKS)?;
        bus.write(I2C_ADDR_MPU6050, &[REG_CONFIG, 0x04], I2C_TIMEOUT_TICKS)?;
        bus.write(I2C_ADDR_MPU6050, &[REG_GYRO_CONFIG, 0x00], I2C_TIMEOUT_TICKS)?;
        bus.write(I2C_ADDR_MPU6050, &[REG_ACCEL_CONFIG, 0x00], I2C_TIMEOUT_TICKS)?;

        log::info!("MPU6050 initialised (+-2g, +-250dps, DLPF 21Hz)");
        Ok(())
    }

    /// Burst-read accel, temperature and gyro registers.
    pub fn read_raw(&self) -> anyhow::Result<RawImuReading> {
        let mut bus = lock_bus(self.bus)?;
        let mut raw = [0u8; 14];
        bus.write_read(I2C_ADDR_MPU6050, &[REG_ACCEL_XOUT_H], &mut raw, I2C_TIMEOUT_TICKS)?;

        let word = |i: usize| i16::from_be_bytes([raw[i], raw[i + 1]]);
        Ok(RawImuReading {
            accel: [word(0), word(2), word(4)],
            // raw[6..8] = temperature, skipped
            gyro: Some([word(8), word(10), word(12)]),
        })
    }
}
