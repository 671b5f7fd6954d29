//! Slot <-> wall-clock conversion across eras.
//!
//! A [TimeHandle] is an immutable snapshot of the system start, the era history and the safe
//! horizon as reported by the base-chain node. Each era maps slots to time with its own slot
//! length, so conversions walk the era summaries instead of assuming one global slot length.
//! Handles go stale as the era history is extended; refresh them rather than holding one
//! past its horizon.

use crate::slot::ChainSlot;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Absolute wall-clock instant.
pub type UtcTime = DateTime<Utc>;

/// Start or end of an era, relative to system start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub slot: ChainSlot,
    #[serde(rename = "time_ms", with = "duration_millis")]
    pub time: Duration,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraParams {
    pub epoch_size: u64,
    #[serde(rename = "slot_length_ms", with = "duration_millis")]
    pub slot_length: Duration,
}

/// One era of the history. `end == None` means the era is not yet bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraSummary {
    pub start: Bound,
    pub end: Option<Bound>,
    pub params: EraParams,
}

impl EraSummary {
    fn contains_slot(&self, slot: ChainSlot) -> bool {
        slot >= self.start.slot && self.end.map_or(true, |end| slot < end.slot)
    }

    fn contains_time(&self, since_start: Duration) -> bool {
        since_start >= self.start.time && self.end.map_or(true, |end| since_start < end.time)
    }

    /// Offset of `slot` from system start, exact to the nanosecond.
    fn slot_offset(&self, slot: ChainSlot) -> Option<Duration> {
        let n = slot.since(self.start.slot)?;
        let nanos = u128::from(n)
            .checked_mul(self.params.slot_length.as_nanos())?
            .checked_add(self.start.time.as_nanos())?;
        u64::try_from(nanos).ok().map(Duration::from_nanos)
    }
}

/// Ordered, contiguous era summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EraHistory(pub Vec<EraSummary>);

impl EraHistory {
    /// Single unbounded era starting at genesis.
    pub fn single(slot_length: Duration, epoch_size: u64) -> Self {
        EraHistory(vec![EraSummary {
            start: Bound {
                slot: ChainSlot::GENESIS,
                time: Duration::ZERO,
                epoch: 0,
            },
            end: None,
            params: EraParams {
                epoch_size,
                slot_length,
            },
        }])
    }

    fn validate(&self) -> Result<(), EraHistoryError> {
        let first = self.0.first().ok_or(EraHistoryError::Empty)?;
        if first.start.slot != ChainSlot::GENESIS || first.start.time != Duration::ZERO {
            return Err(EraHistoryError::BadOrigin);
        }
        for (index, era) in self.0.iter().enumerate() {
            if era.params.slot_length.is_zero() {
                return Err(EraHistoryError::ZeroSlotLength { index });
            }
            match era.end {
                Some(end) => {
                    if end.slot <= era.start.slot {
                        return Err(EraHistoryError::Inverted { index });
                    }
                    if era.slot_offset(end.slot) != Some(end.time) {
                        return Err(EraHistoryError::Inconsistent { index });
                    }
                }
                None if index + 1 != self.0.len() => {
                    return Err(EraHistoryError::UnboundedNotLast { index });
                }
                None => {}
            }
            if index > 0 && self.0[index - 1].end != Some(era.start) {
                return Err(EraHistoryError::Gap { index });
            }
        }
        Ok(())
    }
}

/// Parameters delivered by the time-parameter provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeParams {
    pub system_start: UtcTime,
    pub era_history: EraHistory,
    /// Furthest slot (inclusive) for which conversions are reliable.
    pub horizon: ChainSlot,
    /// Tip slot at the time the parameters were queried.
    pub current_slot: ChainSlot,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EraHistoryError {
    #[error("era history is empty")]
    Empty,

    #[error("first era must start at slot 0, time 0")]
    BadOrigin,

    #[error("era {index} has a zero slot length")]
    ZeroSlotLength { index: usize },

    #[error("era {index} ends before it starts")]
    Inverted { index: usize },

    #[error("era {index} end bound disagrees with its slot length")]
    Inconsistent { index: usize },

    #[error("era {index} is unbounded but is not the last era")]
    UnboundedNotLast { index: usize },

    #[error("era {index} does not start where the previous era ends")]
    Gap { index: usize },

    #[error("horizon slot {horizon} is not covered by the era history")]
    HorizonNotCovered { horizon: ChainSlot },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeConversionError {
    #[error("slot {slot} is past the safe horizon (slot {horizon})")]
    PastHorizon { slot: ChainSlot, horizon: ChainSlot },

    #[error("time {time} precedes system start {system_start}")]
    BeforeSystemStart {
        time: UtcTime,
        system_start: UtcTime,
    },

    #[error("slot {slot} is not covered by the era history")]
    SlotNotCovered { slot: ChainSlot },

    #[error("time {time} is not covered by the era history")]
    TimeNotCovered { time: UtcTime },

    #[error("time arithmetic overflow at slot {slot}")]
    Overflow { slot: ChainSlot },
}

impl TimeConversionError {
    /// The slot that failed to convert, when the failure is about a slot.
    pub fn slot(&self) -> Option<ChainSlot> {
        match self {
            TimeConversionError::PastHorizon { slot, .. }
            | TimeConversionError::SlotNotCovered { slot }
            | TimeConversionError::Overflow { slot } => Some(*slot),
            TimeConversionError::BeforeSystemStart { .. }
            | TimeConversionError::TimeNotCovered { .. } => None,
        }
    }
}

/// Immutable snapshot used to convert between slots and wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeHandle {
    system_start: UtcTime,
    eras: EraHistory,
    horizon: ChainSlot,
    current_slot: ChainSlot,
}

impl TimeHandle {
    pub fn new(params: TimeParams) -> Result<Self, EraHistoryError> {
        params.era_history.validate()?;
        let covered = params
            .era_history
            .0
            .iter()
            .any(|era| era.contains_slot(params.horizon));
        if !covered {
            return Err(EraHistoryError::HorizonNotCovered {
                horizon: params.horizon,
            });
        }
        Ok(Self {
            system_start: params.system_start,
            eras: params.era_history,
            horizon: params.horizon,
            current_slot: params.current_slot,
        })
    }

    pub fn system_start(&self) -> UtcTime {
        self.system_start
    }

    pub fn horizon(&self) -> ChainSlot {
        self.horizon
    }

    pub fn era_history(&self) -> &EraHistory {
        &self.eras
    }

    pub fn slot_to_time(&self, slot: ChainSlot) -> Result<UtcTime, TimeConversionError> {
        if slot > self.horizon {
            return Err(TimeConversionError::PastHorizon {
                slot,
                horizon: self.horizon,
            });
        }
        let era = self
            .eras
            .0
            .iter()
            .find(|era| era.contains_slot(slot))
            .ok_or(TimeConversionError::SlotNotCovered { slot })?;
        let offset = era
            .slot_offset(slot)
            .ok_or(TimeConversionError::Overflow { slot })?;
        let delta =
            TimeDelta::from_std(offset).map_err(|_| TimeConversionError::Overflow { slot })?;
        self.system_start
            .checked_add_signed(delta)
            .ok_or(TimeConversionError::Overflow { slot })
    }

    /// Slot containing `time` (rounded down to the start of the slot).
    pub fn time_to_slot(&self, time: UtcTime) -> Result<ChainSlot, TimeConversionError> {
        let since_start = (time - self.system_start).to_std().map_err(|_| {
            TimeConversionError::BeforeSystemStart {
                time,
                system_start: self.system_start,
            }
        })?;
        let era = self
            .eras
            .0
            .iter()
            .find(|era| era.contains_time(since_start))
            .ok_or(TimeConversionError::TimeNotCovered { time })?;
        let into_era = since_start - era.start.time;
        let n = into_era.as_nanos() / era.params.slot_length.as_nanos();
        let slot = u64::try_from(n)
            .ok()
            .and_then(|n| era.start.slot.0.checked_add(n))
            .map(ChainSlot)
            .ok_or(TimeConversionError::TimeNotCovered { time })?;
        if slot > self.horizon {
            return Err(TimeConversionError::PastHorizon {
                slot,
                horizon: self.horizon,
            });
        }
        Ok(slot)
    }

    /// Tip slot reported with these parameters, and its wall-clock time.
    pub fn current_point_in_time(&self) -> Result<(ChainSlot, UtcTime), TimeConversionError> {
        let time = self.slot_to_time(self.current_slot)?;
        Ok((self.current_slot, time))
    }
}

mod duration_millis {
    use serde::{ser::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis()).map_err(S::Error::custom)?;
        if Duration::from_millis(ms) != *d {
            return Err(S::Error::custom("duration is not a whole number of milliseconds"));
        }
        s.serialize_u64(ms)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
