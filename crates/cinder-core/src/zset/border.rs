//! Score range borders for sorted-set range queries.
//!
//! A border is one end of a `ZRANGEBYSCORE`-style interval: infinite,
//! inclusive, or exclusive (`(5.0` syntax on the wire).

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBorder {
    NegInf,
    PosInf,
    Value { value: f64, exclusive: bool },
}

impl ScoreBorder {
    /// Parses a wire argument: `-inf`, `+inf`/`inf`, `(score`, or `score`.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.eq_ignore_ascii_case(b"inf") || raw.eq_ignore_ascii_case(b"+inf") {
            return Some(ScoreBorder::PosInf);
        }
        if raw.eq_ignore_ascii_case(b"-inf") {
            return Some(ScoreBorder::NegInf);
        }
        let (digits, exclusive) = match raw.first() {
            Some(b'(') => (&raw[1..], true),
            _ => (raw, false),
        };
        let value: f64 = std::str::from_utf8(digits).ok()?.parse().ok()?;
        if value.is_nan() {
            return None;
        }
        Some(ScoreBorder::Value { value, exclusive })
    }

    /// Whether this border sits above `score` — i.e. `score` is inside
    /// an interval whose upper end is this border.
    pub fn greater(&self, score: f64) -> bool {
        match *self {
            ScoreBorder::NegInf => false,
            ScoreBorder::PosInf => true,
            ScoreBorder::Value { value, exclusive } => {
                if exclusive {
                    value > score
                } else {
                    value >= score
                }
            }
        }
    }

    /// Whether this border sits below `score` — i.e. `score` is inside
    /// an interval whose lower end is this border.
    pub fn less(&self, score: f64) -> bool {
        match *self {
            ScoreBorder::NegInf => true,
            ScoreBorder::PosInf => false,
            ScoreBorder::Value { value, exclusive } => {
                if exclusive {
                    value < score
                } else {
                    value <= score
                }
            }
        }
    }

    /// The numeric bound and exclusivity, for empty-interval checks.
    pub(crate) fn bound(&self) -> (f64, bool) {
        match *self {
            ScoreBorder::NegInf => (f64::NEG_INFINITY, false),
            ScoreBorder::PosInf => (f64::INFINITY, false),
            ScoreBorder::Value { value, exclusive } => (value, exclusive),
        }
    }
}

/// True when no score can satisfy `min <= s <= max`.
pub(crate) fn is_empty_range(min: &ScoreBorder, max: &ScoreBorder) -> bool {
    let (min_value, min_excl) = min.bound();
    let (max_value, max_excl) = max.bound();
    min_value > max_value || (min_value == max_value && (min_excl || max_excl))
}
