use core::fmt::Debug;

pub trait StrainGaugeInterface {
    type Error: Debug;

    /// Initialise the gauge and make it ready for taking readings.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Get the next raw reading from the gauge. Implementations must bound
    /// the wait for a conversion; a gauge that does not answer in time
    /// returns an error and the caller retries on a later tick.
    fn read_raw(&mut self) -> Result<i32, Self::Error>;
}
