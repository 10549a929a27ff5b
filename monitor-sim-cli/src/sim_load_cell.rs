use core::convert::Infallible;
use water_monitor::config::CALIBRATION_FACTOR;
use water_monitor::weight::interface::StrainGaugeInterface;

const VESSEL_PLACED_TICK: u64 = 6;
const FULL_VESSEL_GRAMS: f32 = 350.0;
const SIP_GRAMS: f32 = 40.0;
const TICKS_BETWEEN_SIPS: u64 = 24;
const NEARLY_EMPTY_GRAMS: f32 = 50.0;
const NOISE_COUNTS: i32 = 3;

/// Deterministic stand-in for the real cell: an empty scale, a vessel
/// placed after a few ticks, a sip at a fixed cadence and a refill when it
/// runs low. Raw counts follow the same linear convention the device
/// calibration expects, plus a few counts of jitter.
pub struct SimulatedLoadCell {
    tick: u64,
    grams_on_cell: f32,
    noise_state: u32,
}

impl SimulatedLoadCell {
    pub fn new() -> Self {
        Self {
            tick: 0,
            grams_on_cell: 0.0,
            noise_state: 0x2F6E_12B1,
        }
    }

    fn advance(&mut self) {
        if self.tick == VESSEL_PLACED_TICK {
            self.grams_on_cell = FULL_VESSEL_GRAMS;
            log::info!("sim: vessel placed ({} g)", FULL_VESSEL_GRAMS);
        } else if self.tick > VESSEL_PLACED_TICK
            && (self.tick - VESSEL_PLACED_TICK) % TICKS_BETWEEN_SIPS == 0
        {
            if self.grams_on_cell <= NEARLY_EMPTY_GRAMS {
                self.grams_on_cell = FULL_VESSEL_GRAMS;
                log::info!("sim: refill");
            } else {
                self.grams_on_cell -= SIP_GRAMS;
                log::info!("sim: sip, {} g left", self.grams_on_cell);
            }
        }
        self.tick += 1;
    }

    // xorshift32, good enough for count-level jitter
    fn noise(&mut self) -> i32 {
        let mut x = self.noise_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise_state = x;
        (x % (2 * NOISE_COUNTS as u32 + 1)) as i32 - NOISE_COUNTS
    }
}

impl StrainGaugeInterface for SimulatedLoadCell {
    type Error = Infallible;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read_raw(&mut self) -> Result<i32, Self::Error> {
        self.advance();
        let raw = (self.grams_on_cell * CALIBRATION_FACTOR) as i32 + self.noise();
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grams_of(raw: i32) -> f32 {
        raw as f32 / CALIBRATION_FACTOR
    }

    #[test]
    fn vessel_appears_after_the_settling_period() {
        let mut cell = SimulatedLoadCell::new();
        for _ in 0..VESSEL_PLACED_TICK {
            let raw = cell.read_raw().unwrap();
            assert!(grams_of(raw).abs() < 1.0);
        }
        let raw = cell.read_raw().unwrap();
        assert!((grams_of(raw) - FULL_VESSEL_GRAMS).abs() < 1.0);
    }

    #[test]
    fn sips_step_the_weight_down() {
        let mut cell = SimulatedLoadCell::new();
        let mut last = 0.0;
        for _ in 0..=VESSEL_PLACED_TICK {
            last = grams_of(cell.read_raw().unwrap());
        }
        for _ in 0..TICKS_BETWEEN_SIPS {
            last = grams_of(cell.read_raw().unwrap());
        }
        assert!((last - (FULL_VESSEL_GRAMS - SIP_GRAMS)).abs() < 1.0);
    }
}
