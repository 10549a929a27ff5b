use crate::config::AVERAGE_SAMPLES;
use heapless::HistoryBuffer;
use micromath::statistics::Mean;

/// Moving average over the last [`AVERAGE_SAMPLES`] calibrated readings.
/// With averaging disabled every sample passes through untouched.
pub struct WeightFilter {
    window: HistoryBuffer<f32, AVERAGE_SAMPLES>,
    averaging_enabled: bool,
}

impl WeightFilter {
    pub fn new(averaging_enabled: bool) -> Self {
        Self {
            window: HistoryBuffer::new(),
            averaging_enabled,
        }
    }

    /// Feed one calibrated sample, get the smoothed weight back.
    pub fn push(&mut self, grams: f32) -> f32 {
        if !self.averaging_enabled {
            return grams;
        }
        self.window.write(grams);
        self.window.as_slice().iter().copied().mean()
    }

    /// Empty the window in place. Capacity is fixed, nothing is reallocated.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_samples_average_to_themselves() {
        let mut filter = WeightFilter::new(true);
        let mut smoothed = 0.0;
        for _ in 0..AVERAGE_SAMPLES {
            smoothed = filter.push(42.5);
        }
        assert!((smoothed - 42.5).abs() < 1e-6);
    }

    #[test]
    fn step_input_converges_monotonically_within_window() {
        let mut filter = WeightFilter::new(true);
        for _ in 0..AVERAGE_SAMPLES {
            filter.push(0.0);
        }

        let mut previous = 0.0;
        let mut smoothed = 0.0;
        for _ in 0..AVERAGE_SAMPLES {
            smoothed = filter.push(100.0);
            assert!(smoothed > previous);
            previous = smoothed;
        }
        // Old samples fully evicted after one window length
        assert!((smoothed - 100.0).abs() < 1e-6);
    }

    #[test]
    fn disabled_filter_passes_samples_through() {
        let mut filter = WeightFilter::new(false);
        filter.push(10.0);
        assert_eq!(filter.push(250.5), 250.5);
        assert!(filter.is_empty());
    }

    #[test]
    fn reset_empties_the_window() {
        let mut filter = WeightFilter::new(true);
        filter.push(10.0);
        filter.push(20.0);
        filter.reset();
        assert!(filter.is_empty());
        // First sample after a reset is its own average
        assert_eq!(filter.push(30.0), 30.0);
    }
}
