use log::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightTrend {
    /// The weight has settled on a plateau
    Stable,
    /// The weight dropped from the stable baseline, payload is grams removed
    DrinkDetected { grams: f32 },
    Unchanged,
}

/// Classifies each smoothed reading against the last stable baseline.
///
/// A drop of at least the threshold is a drink, a rise of at least the
/// threshold is a refill and only moves the baseline. In-threshold readings
/// accumulate towards a stable plateau.
pub struct DrinkDetector {
    weight_threshold: f32,
    stable_readings: u32,
    last_stable_weight: Option<f32>,
    consecutive_stable_count: u32,
}

impl DrinkDetector {
    pub fn new(weight_threshold: f32, stable_readings: u32) -> Self {
        Self {
            weight_threshold,
            stable_readings,
            last_stable_weight: None,
            consecutive_stable_count: 0,
        }
    }

    pub fn update(&mut self, grams: f32) -> WeightTrend {
        let Some(baseline) = self.last_stable_weight else {
            // First reading after startup or tare, nothing to compare against
            self.last_stable_weight = Some(grams);
            self.consecutive_stable_count = 0;
            return WeightTrend::Unchanged;
        };

        let delta = grams - baseline;

        if delta <= -self.weight_threshold {
            let consumed = baseline - grams;
            debug!("Drink detected: {} g", consumed);
            self.last_stable_weight = Some(grams);
            self.consecutive_stable_count = 0;
            return WeightTrend::DrinkDetected { grams: consumed };
        }

        if delta >= self.weight_threshold {
            // Refill or vessel placed: new baseline, no drink event
            trace!("New baseline {} g", grams);
            self.last_stable_weight = Some(grams);
            self.consecutive_stable_count = 0;
            return WeightTrend::Unchanged;
        }

        // Saturating so a long plateau cannot wrap back onto the trigger count
        self.consecutive_stable_count = self.consecutive_stable_count.saturating_add(1);
        if self.consecutive_stable_count == self.stable_readings {
            trace!("Weight settled at {} g", grams);
            self.last_stable_weight = Some(grams);
            return WeightTrend::Stable;
        }

        WeightTrend::Unchanged
    }

    pub fn reset(&mut self) {
        self.last_stable_weight = None;
        self.consecutive_stable_count = 0;
    }

    pub fn last_stable_weight(&self) -> Option<f32> {
        self.last_stable_weight
    }

    pub fn consecutive_stable_count(&self) -> u32 {
        self.consecutive_stable_count
    }
}
