//! Types for global one-time configuration of the runtime parameters used by
//! the table and its reclamation scheme.

use core::time::Duration;

include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));

const DEFAULT_MIN_STORE_SIZE: usize = 64;
const DEFAULT_GROWTH_NUM: usize = 3;
const DEFAULT_GROWTH_DEN: usize = 4;
const DEFAULT_MIGRATION_SLEEP_NANOS: u64 = 30_000;
const DEFAULT_MIGRATION_MAX_WAITS: u32 = 8;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Config
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runtime configuration parameters for a [`Table`](crate::Table).
#[derive(Copy, Clone, Debug)]
pub struct Config {
    min_store_size: usize,
    growth_num: usize,
    growth_den: usize,
    scan_threshold: u32,
    wait_for_migrator: bool,
    migration_sleep: Duration,
    migration_max_waits: u32,
}

/********** impl Default **************************************************************************/

impl Default for Config {
    #[inline]
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/********** impl inherent *************************************************************************/

impl Config {
    /// Returns the minimum number of buckets a store may have.
    ///
    /// Must be a power of two and at least 2 (a single-bucket store can
    /// never satisfy the 3/4 growth threshold without immediately
    /// re-migrating).
    #[inline]
    pub fn min_store_size(&self) -> usize {
        self.min_store_size
    }

    /// Returns the `(num, den)` pair for the growth/shrink threshold ratio,
    /// i.e. a store migrates once `used_count * den >= size * num`.
    #[inline]
    pub fn growth_ratio(&self) -> (usize, usize) {
        (self.growth_num, self.growth_den)
    }

    /// Returns the number of retired records (or reclamation-counted
    /// operations) after which a thread attempts a reclamation sweep.
    #[inline]
    pub fn scan_threshold(&self) -> u32 {
        self.scan_threshold
    }

    /// Returns whether the hihat-a bounded-sleep wait variant is enabled for
    /// migration: a thread that finds a migration already underway sleeps a
    /// few times, checking whether it has completed, before helping.
    #[inline]
    pub fn wait_for_migrator(&self) -> bool {
        self.wait_for_migrator
    }

    /// Returns the sleep interval used by the wait variant.
    #[inline]
    pub fn migration_sleep(&self) -> Duration {
        self.migration_sleep
    }

    /// Returns the maximum number of sleeps attempted by the wait variant
    /// before a thread gives up waiting and helps migrate itself.
    #[inline]
    pub fn migration_max_waits(&self) -> u32 {
        self.migration_max_waits
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigBuilder
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A builder type for gradually initializing a [`Config`].
///
/// This is mainly useful for keeping stability, in case the internal
/// structure of the [`Config`] type changes in the future, e.g. because
/// further parameters are added.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConfigBuilder {
    min_store_size: Option<usize>,
    growth_ratio: Option<(usize, usize)>,
    scan_threshold: Option<u32>,
    wait_for_migrator: Option<bool>,
    migration_sleep: Option<Duration>,
    migration_max_waits: Option<u32>,
}

impl ConfigBuilder {
    /// Creates a new [`ConfigBuilder`] with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum store size.
    ///
    /// # Panics
    ///
    /// This function panics (deferred until [`build`](Self::build)) if the
    /// value is not a power of two or is smaller than 2.
    #[inline]
    pub fn min_store_size(mut self, min_store_size: usize) -> Self {
        self.min_store_size = Some(min_store_size);
        self
    }

    /// Sets the growth/shrink threshold ratio as `(num, den)`.
    #[inline]
    pub fn growth_ratio(mut self, num: usize, den: usize) -> Self {
        self.growth_ratio = Some((num, den));
        self
    }

    /// Sets the reclamation scan threshold.
    ///
    /// # Panics
    ///
    /// This function panics (deferred until [`build`](Self::build)) if the
    /// value is 0.
    #[inline]
    pub fn scan_threshold(mut self, scan_threshold: u32) -> Self {
        self.scan_threshold = Some(scan_threshold);
        self
    }

    /// Enables or disables the bounded-sleep migration wait variant.
    #[inline]
    pub fn wait_for_migrator(mut self, enabled: bool) -> Self {
        self.wait_for_migrator = Some(enabled);
        self
    }

    /// Sets the sleep interval used by the wait variant.
    #[inline]
    pub fn migration_sleep(mut self, sleep: Duration) -> Self {
        self.migration_sleep = Some(sleep);
        self
    }

    /// Sets the maximum number of sleeps attempted by the wait variant.
    #[inline]
    pub fn migration_max_waits(mut self, max_waits: u32) -> Self {
        self.migration_max_waits = Some(max_waits);
        self
    }

    /// Consumes the [`ConfigBuilder`] and returns an initialized [`Config`].
    ///
    /// Unspecified parameters are initialized with their default values.
    ///
    /// # Panics
    ///
    /// Panics if `min_store_size` is not a power of two >= 2, or if
    /// `scan_threshold` is 0.
    #[inline]
    pub fn build(self) -> Config {
        let min_store_size = self.min_store_size.unwrap_or(DEFAULT_MIN_STORE_SIZE);
        assert!(
            min_store_size >= 2 && min_store_size.is_power_of_two(),
            "min_store_size must be a power of two >= 2"
        );

        let (growth_num, growth_den) =
            self.growth_ratio.unwrap_or((DEFAULT_GROWTH_NUM, DEFAULT_GROWTH_DEN));

        let scan_threshold = self.scan_threshold.unwrap_or(DEFAULT_SCAN_THRESHOLD);
        assert!(scan_threshold > 0, "scan threshold must be greater than 0");

        Config {
            min_store_size,
            growth_num,
            growth_den,
            scan_threshold,
            wait_for_migrator: self.wait_for_migrator.unwrap_or(cfg!(feature = "wait-variant")),
            migration_sleep: self
                .migration_sleep
                .unwrap_or(Duration::from_nanos(DEFAULT_MIGRATION_SLEEP_NANOS)),
            migration_max_waits: self.migration_max_waits.unwrap_or(DEFAULT_MIGRATION_MAX_WAITS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.min_store_size(), DEFAULT_MIN_STORE_SIZE);
        assert_eq!(config.growth_ratio(), (DEFAULT_GROWTH_NUM, DEFAULT_GROWTH_DEN));
        assert!(!config.wait_for_migrator());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two() {
        let _ = ConfigBuilder::new().min_store_size(100).build();
    }

    #[test]
    #[should_panic(expected = "scan threshold")]
    fn rejects_zero_scan_threshold() {
        let _ = ConfigBuilder::new().scan_threshold(0).build();
    }
}
