use crate::weight::interface::StrainGaugeInterface;
use crate::weight::ReadingSample;
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    /// A zero scale factor cannot convert counts to grams
    ZeroScaleFactor,
    /// The reference measurement cannot produce a usable scale factor
    UnusableReference,
}

/// Linear raw-count to grams mapping. The zero offset moves with every tare;
/// the scale factor only changes through an explicit calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    scale_factor: f32,
    zero_offset: f32,
}

impl Calibration {
    pub fn new(scale_factor: f32) -> Result<Self, CalibrationError> {
        if scale_factor == 0.0 {
            return Err(CalibrationError::ZeroScaleFactor);
        }
        Ok(Self {
            scale_factor,
            zero_offset: 0.0,
        })
    }

    pub fn to_grams(&self, raw: i32) -> f32 {
        let grams = (raw as f32 - self.zero_offset) / self.scale_factor;
        // A negative factor turns an exact zero into IEEE -0.0, which
        // would reach the wire as "-0.000"
        if grams == 0.0 {
            0.0
        } else {
            grams
        }
    }

    /// Make `raw` the new zero-weight baseline.
    pub fn tare_at(&mut self, raw: i32) {
        self.zero_offset = raw as f32;
        trace!("Tare offset = {}", self.zero_offset);
    }

    /// Derive a new scale factor from a raw reading taken with a known
    /// reference mass on the cell. Tare first so the offset is current.
    pub fn calibrate_with_known_mass(
        &mut self,
        raw: i32,
        known_grams: f32,
    ) -> Result<(), CalibrationError> {
        let counts_per_gram = (raw as f32 - self.zero_offset) / known_grams;
        if !counts_per_gram.is_finite() || counts_per_gram == 0.0 {
            return Err(CalibrationError::UnusableReference);
        }
        self.scale_factor = counts_per_gram;
        trace!("Calibration counts per gram = {}", counts_per_gram);
        Ok(())
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub fn zero_offset(&self) -> f32 {
        self.zero_offset
    }
}

#[derive(Debug)]
pub enum Error<StrainGaugeE> {
    StrainGaugeReadingError(StrainGaugeE),
}

pub struct WeightScale<StrainGauge> {
    strain_gauge: StrainGauge,
    calibration: Calibration,
}

impl<StrainGauge, StrainGaugeE> WeightScale<StrainGauge>
where
    StrainGauge: StrainGaugeInterface<Error = StrainGaugeE>,
{
    pub fn new(
        mut strain_gauge: StrainGauge,
        calibration: Calibration,
    ) -> Result<Self, Error<StrainGaugeE>> {
        strain_gauge
            .initialize()
            .map_err(Error::StrainGaugeReadingError)?;
        Ok(Self {
            strain_gauge,
            calibration,
        })
    }

    pub fn read_sample(&mut self, timestamp_ms: u64) -> Result<ReadingSample, Error<StrainGaugeE>> {
        let raw = self
            .strain_gauge
            .read_raw()
            .map_err(Error::StrainGaugeReadingError)?;
        trace!("Raw reading = {}", raw);
        Ok(ReadingSample { raw, timestamp_ms })
    }

    pub fn to_grams(&self, sample: &ReadingSample) -> f32 {
        self.calibration.to_grams(sample.raw)
    }

    pub fn tare_at(&mut self, raw: i32) {
        self.calibration.tare_at(raw);
    }

    pub fn calibrate_with_known_mass(
        &mut self,
        raw: i32,
        known_grams: f32,
    ) -> Result<(), CalibrationError> {
        self.calibration.calibrate_with_known_mass(raw, known_grams)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }
}
