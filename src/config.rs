use std::time::Duration;

/// Coordination parameters shared by the lease manager, coordinator and
/// execution ledger.
///
/// The defaults bound failover time to a small multiple of
/// `lease_duration` while the renewal cadence (`lease_duration *
/// renewal_fraction`) tolerates a missed renewal or two before ownership
/// lapses.
#[derive(Debug, Clone)]
pub struct CoordConfig {
    /// How long an acquired lease remains valid without renewal.
    pub lease_duration: Duration,
    /// Fraction of `lease_duration` between renewal attempts. Must be in
    /// (0, 1); 1/3 leaves room for two missed renewals.
    pub renewal_fraction: f64,
    /// Age after which a Started ledger record may be taken over by a new
    /// leader. `None` means `lease_duration * 2`.
    pub ledger_staleness_threshold: Option<Duration>,
    /// Upper bound on a single acquisition attempt against the store.
    pub acquire_timeout: Duration,
    /// Upper bound on a single renewal write. A renewal that exceeds this
    /// counts as lost ownership, never as "probably still fine".
    pub renew_timeout: Duration,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            renewal_fraction: 1.0 / 3.0,
            ledger_staleness_threshold: None,
            acquire_timeout: Duration::from_secs(5),
            renew_timeout: Duration::from_secs(3),
        }
    }
}

impl CoordConfig {
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_renewal_fraction(mut self, renewal_fraction: f64) -> Self {
        self.renewal_fraction = renewal_fraction;
        self
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.ledger_staleness_threshold = Some(threshold);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_renew_timeout(mut self, timeout: Duration) -> Self {
        self.renew_timeout = timeout;
        self
    }

    /// Interval between renewal attempts while holding the lease.
    pub fn renewal_interval(&self) -> Duration {
        self.lease_duration.mul_f64(self.renewal_fraction)
    }

    /// Effective staleness threshold for Started ledger records.
    pub fn staleness_threshold(&self) -> Duration {
        self.ledger_staleness_threshold
            .unwrap_or_else(|| self.lease_duration * 2)
    }

    /// Check the configuration is internally consistent.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.lease_duration.is_zero() {
            return Err("lease_duration must be non-zero".to_string());
        }
        if !(self.renewal_fraction > 0.0 && self.renewal_fraction < 1.0) {
            return Err(format!(
                "renewal_fraction must be in (0, 1), got {}",
                self.renewal_fraction
            ));
        }
        if self.renew_timeout >= self.lease_duration {
            return Err("renew_timeout must be shorter than lease_duration".to_string());
        }
        Ok(())
    }
}
