//! Per-cycle risk parameters and their validation rules.
//!
//! Every setter validates before mutating, so a rejected value leaves the
//! previous configuration untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest budget accepted, in account currency.
pub const MAX_BUDGET: Decimal = dec!(1000000);

/// Largest strike distance accepted, in index points.
pub const MAX_DELTA: Decimal = dec!(10000);

/// Largest profit multiple accepted for either tier.
pub const MAX_TIER_MULTIPLE: Decimal = dec!(1000);

/// Sampling interval bounds, in seconds.
pub const MIN_SAMPLING_SECS: u64 = 1;
pub const MAX_SAMPLING_SECS: u64 = 3_600;

/// Entry may be offset from the event by at most one day either way.
pub const MAX_ENTRY_OFFSET_SECS: i64 = 86_400;

/// Events may be scheduled at most this many days ahead.
pub const MAX_EVENT_HORIZON_DAYS: i64 = 31;

/// Immutable-per-cycle exit and sizing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParameters {
    /// Total premium to spend on both legs.
    pub budget: Decimal,
    /// Distance from the underlying used to pick strikes.
    pub delta: Decimal,
    /// Loss fraction of entry level that triggers the stop (0.5 = -50%).
    pub stop_fraction: Decimal,
    /// Fraction of remaining size sold when the stop or trailing stop fires.
    pub stop_exit_fraction: Decimal,
    /// Pullback fraction from the all-time-high that triggers the trailing stop.
    pub trailing_fraction: Decimal,
    /// Bid/entry multiple for the first profit tier.
    pub tier2_multiple: Decimal,
    /// Fraction of remaining size sold at tier 2.
    pub tier2_exit_fraction: Decimal,
    /// Fraction of the opposite leg unwound at tier 2, if any.
    pub tier2_unwind_fraction: Option<Decimal>,
    /// Bid/entry multiple for the second profit tier.
    pub tier3_multiple: Decimal,
    /// Fraction of remaining size sold at tier 3.
    pub tier3_exit_fraction: Decimal,
    /// Close whatever remains of the opposite leg at tier 3.
    pub tier3_close_opposite: bool,
    /// Seconds between lifecycle ticks.
    pub sampling_interval_secs: u64,
    /// Entry time relative to the event, in seconds (negative = before).
    pub entry_offset_secs: i64,
    /// Position sizes are multiples of this.
    pub size_granularity: Decimal,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            budget: dec!(100),
            delta: dec!(50),
            stop_fraction: dec!(0.5),
            stop_exit_fraction: Decimal::ONE,
            trailing_fraction: dec!(0.3),
            tier2_multiple: dec!(2),
            tier2_exit_fraction: dec!(0.5),
            tier2_unwind_fraction: Some(dec!(0.5)),
            tier3_multiple: dec!(3),
            tier3_exit_fraction: dec!(0.5),
            tier3_close_opposite: true,
            sampling_interval_secs: 5,
            entry_offset_secs: 0,
            size_granularity: dec!(0.01),
        }
    }
}

fn open_fraction(field: &'static str, value: Decimal) -> Result<Decimal, ValidationError> {
    if value > Decimal::ZERO && value < Decimal::ONE {
        Ok(value)
    } else {
        Err(ValidationError::new(
            field,
            format!("must lie strictly between 0 and 1, got {value}"),
        ))
    }
}

fn exit_fraction(field: &'static str, value: Decimal) -> Result<Decimal, ValidationError> {
    if value > Decimal::ZERO && value <= Decimal::ONE {
        Ok(value)
    } else {
        Err(ValidationError::new(
            field,
            format!("must lie in (0, 1], got {value}"),
        ))
    }
}

fn bounded_positive(
    field: &'static str,
    value: Decimal,
    ceiling: Decimal,
) -> Result<Decimal, ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::new(
            field,
            format!("must be positive, got {value}"),
        ));
    }
    if value > ceiling {
        return Err(ValidationError::new(
            field,
            format!("{value} exceeds ceiling {ceiling}"),
        ));
    }
    Ok(value)
}

impl RiskParameters {
    /// Validates every field and the cross-field tier ordering.
    ///
    /// # Errors
    /// Returns the first `ValidationError` encountered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        bounded_positive("budget", self.budget, MAX_BUDGET)?;
        bounded_positive("delta", self.delta, MAX_DELTA)?;
        open_fraction("stop_fraction", self.stop_fraction)?;
        exit_fraction("stop_exit_fraction", self.stop_exit_fraction)?;
        open_fraction("trailing_fraction", self.trailing_fraction)?;
        exit_fraction("tier2_exit_fraction", self.tier2_exit_fraction)?;
        if let Some(unwind) = self.tier2_unwind_fraction {
            exit_fraction("tier2_unwind_fraction", unwind)?;
        }
        exit_fraction("tier3_exit_fraction", self.tier3_exit_fraction)?;
        validate_tiers(self.tier2_multiple, self.tier3_multiple)?;
        validate_sampling_interval(self.sampling_interval_secs)?;
        validate_entry_offset(self.entry_offset_secs)?;
        exit_fraction("size_granularity", self.size_granularity)?;
        Ok(())
    }

    /// Sampling interval as a `Duration`.
    #[must_use]
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs)
    }

    /// Entry offset as a signed `chrono::Duration`.
    #[must_use]
    pub fn entry_offset(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.entry_offset_secs)
    }

    /// Sets the budget.
    ///
    /// # Errors
    /// Rejects non-positive values and values above [`MAX_BUDGET`].
    pub fn set_budget(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.budget = bounded_positive("budget", value, MAX_BUDGET)?;
        Ok(())
    }

    /// Sets the strike distance.
    ///
    /// # Errors
    /// Rejects non-positive values and values above [`MAX_DELTA`].
    pub fn set_delta(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.delta = bounded_positive("delta", value, MAX_DELTA)?;
        Ok(())
    }

    /// Sets the stop-loss fraction.
    ///
    /// # Errors
    /// Rejects values outside (0, 1).
    pub fn set_stop_fraction(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.stop_fraction = open_fraction("stop_fraction", value)?;
        Ok(())
    }

    /// Sets the fraction sold by the stop and trailing stop.
    ///
    /// # Errors
    /// Rejects values outside (0, 1].
    pub fn set_stop_exit_fraction(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.stop_exit_fraction = exit_fraction("stop_exit_fraction", value)?;
        Ok(())
    }

    /// Sets the trailing-stop pullback fraction.
    ///
    /// # Errors
    /// Rejects values outside (0, 1).
    pub fn set_trailing_fraction(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.trailing_fraction = open_fraction("trailing_fraction", value)?;
        Ok(())
    }

    /// Sets the tier-2 multiple; must stay below tier 3.
    ///
    /// # Errors
    /// Rejects values `<= 1` or `>=` the tier-3 multiple.
    pub fn set_tier2_multiple(&mut self, value: Decimal) -> Result<(), ValidationError> {
        validate_tiers(value, self.tier3_multiple)?;
        self.tier2_multiple = value;
        Ok(())
    }

    /// Sets the tier-2 exit fraction.
    ///
    /// # Errors
    /// Rejects values outside (0, 1].
    pub fn set_tier2_exit_fraction(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.tier2_exit_fraction = exit_fraction("tier2_exit_fraction", value)?;
        Ok(())
    }

    /// Sets or clears the tier-2 opposite-leg unwind fraction.
    ///
    /// # Errors
    /// Rejects values outside (0, 1].
    pub fn set_tier2_unwind_fraction(
        &mut self,
        value: Option<Decimal>,
    ) -> Result<(), ValidationError> {
        if let Some(v) = value {
            exit_fraction("tier2_unwind_fraction", v)?;
        }
        self.tier2_unwind_fraction = value;
        Ok(())
    }

    /// Sets the tier-3 multiple; must stay above tier 2.
    ///
    /// # Errors
    /// Rejects values `<=` the tier-2 multiple or above [`MAX_TIER_MULTIPLE`].
    pub fn set_tier3_multiple(&mut self, value: Decimal) -> Result<(), ValidationError> {
        validate_tiers(self.tier2_multiple, value)?;
        self.tier3_multiple = value;
        Ok(())
    }

    /// Sets the tier-3 exit fraction.
    ///
    /// # Errors
    /// Rejects values outside (0, 1].
    pub fn set_tier3_exit_fraction(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.tier3_exit_fraction = exit_fraction("tier3_exit_fraction", value)?;
        Ok(())
    }

    /// Toggles full close of the opposite leg at tier 3.
    pub fn set_tier3_close_opposite(&mut self, value: bool) {
        self.tier3_close_opposite = value;
    }

    /// Sets the sampling interval in seconds.
    ///
    /// # Errors
    /// Rejects values outside `[MIN_SAMPLING_SECS, MAX_SAMPLING_SECS]`.
    pub fn set_sampling_interval_secs(&mut self, value: u64) -> Result<(), ValidationError> {
        validate_sampling_interval(value)?;
        self.sampling_interval_secs = value;
        Ok(())
    }

    /// Sets the entry offset in seconds relative to the event.
    ///
    /// # Errors
    /// Rejects offsets larger than one day in either direction.
    pub fn set_entry_offset_secs(&mut self, value: i64) -> Result<(), ValidationError> {
        validate_entry_offset(value)?;
        self.entry_offset_secs = value;
        Ok(())
    }

    /// Sets the size rounding granularity.
    ///
    /// # Errors
    /// Rejects values outside (0, 1].
    pub fn set_size_granularity(&mut self, value: Decimal) -> Result<(), ValidationError> {
        self.size_granularity = exit_fraction("size_granularity", value)?;
        Ok(())
    }
}

fn validate_tiers(tier2: Decimal, tier3: Decimal) -> Result<(), ValidationError> {
    if tier2 <= Decimal::ONE {
        return Err(ValidationError::new(
            "tier2_multiple",
            format!("must be greater than 1, got {tier2}"),
        ));
    }
    if tier3 <= tier2 {
        return Err(ValidationError::new(
            "tier3_multiple",
            format!("must be greater than tier2 multiple {tier2}, got {tier3}"),
        ));
    }
    if tier3 > MAX_TIER_MULTIPLE {
        return Err(ValidationError::new(
            "tier3_multiple",
            format!("{tier3} exceeds ceiling {MAX_TIER_MULTIPLE}"),
        ));
    }
    Ok(())
}

fn validate_sampling_interval(secs: u64) -> Result<(), ValidationError> {
    if (MIN_SAMPLING_SECS..=MAX_SAMPLING_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "sampling_interval_secs",
            format!("must lie in [{MIN_SAMPLING_SECS}, {MAX_SAMPLING_SECS}], got {secs}"),
        ))
    }
}

fn validate_entry_offset(secs: i64) -> Result<(), ValidationError> {
    if secs.abs() <= MAX_ENTRY_OFFSET_SECS {
        Ok(())
    } else {
        Err(ValidationError::new(
            "entry_offset_secs",
            format!("magnitude must be at most {MAX_ENTRY_OFFSET_SECS}, got {secs}"),
        ))
    }
}

/// Checks an event timestamp is in the future and within the scheduling horizon.
///
/// # Errors
/// Returns `ValidationError` for past events or events too far ahead.
pub fn validate_event_time(
    event_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    if event_time <= now {
        return Err(ValidationError::new(
            "event_time",
            format!("{event_time} is not in the future"),
        ));
    }
    if event_time - now > chrono::Duration::days(MAX_EVENT_HORIZON_DAYS) {
        return Err(ValidationError::new(
            "event_time",
            format!("{event_time} is more than {MAX_EVENT_HORIZON_DAYS} days ahead"),
        ));
    }
    Ok(event_time)
}

/// Parses an RFC 3339 event timestamp and validates it.
///
/// # Errors
/// Returns `ValidationError` for malformed input or an out-of-range time.
pub fn parse_event_time(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| ValidationError::new("event_time", format!("malformed timestamp: {e}")))?;
    validate_event_time(parsed.with_timezone(&Utc), now)
}

/// Checks a currency code is three upper-case ASCII letters.
///
/// # Errors
/// Returns `ValidationError` for anything else.
pub fn validate_currency_code(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "currency",
            format!("expected a 3-letter ISO code, got {code:?}"),
        ))
    }
}
