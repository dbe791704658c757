// src/strategies/custom.rs
use crate::error::{ConfigError, IndicatorError};
use crate::indicators::{AverageKind, IndicatorCache};
use crate::strategies::traits::Strategy;
use crate::types::{Bar, PriceField, Trend};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Wma,
    Rsi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub kind: IndicatorKind,
    pub period: usize,
    #[serde(default = "default_price")]
    pub price: PriceField,
}

fn default_price() -> PriceField {
    PriceField::Close
}

impl IndicatorSpec {
    fn required_bars(&self) -> usize {
        match self.kind {
            IndicatorKind::Rsi => self.period + 1,
            _ => self.period,
        }
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            IndicatorKind::Sma => "SMA",
            IndicatorKind::Ema => "EMA",
            IndicatorKind::Wma => "WMA",
            IndicatorKind::Rsi => "RSI",
        };
        write!(f, "{}({}, {})", kind, self.period, self.price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Operator {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Operator::Greater => left > right,
            Operator::GreaterOrEqual => left >= right,
            Operator::Less => left < right,
            Operator::LessOrEqual => left <= right,
            Operator::Equal => left == right,
            Operator::NotEqual => left != right,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        };
        f.write_str(s)
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Comparand {
    CurrentPrice,
    Constant { value: f64 },
    Indicator(IndicatorSpec),
}

impl fmt::Display for Comparand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparand::CurrentPrice => f.write_str("price"),
            Comparand::Constant { value } => write!(f, "{}", value),
            Comparand::Indicator(spec) => write!(f, "{}", spec),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub indicator: IndicatorSpec,
    pub operator: Operator,
    pub against: Comparand,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.indicator, self.operator, self.against)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomParams {
    pub name: String,
    #[serde(default)]
    pub enter_long: Vec<Condition>,
    #[serde(default)]
    pub exit_long: Vec<Condition>,
    #[serde(default)]
    pub enter_short: Vec<Condition>,
    #[serde(default)]
    pub exit_short: Vec<Condition>,
}

impl CustomParams {
    fn groups(&self) -> [(Trend, &[Condition]); 4] {
        [
            (Trend::EnterLong, self.enter_long.as_slice()),
            (Trend::ExitLong, self.exit_long.as_slice()),
            (Trend::EnterShort, self.enter_short.as_slice()),
            (Trend::ExitShort, self.exit_short.as_slice()),
        ]
    }

    fn specs(&self) -> impl Iterator<Item = &IndicatorSpec> {
        self.enter_long
            .iter()
            .chain(&self.exit_long)
            .chain(&self.enter_short)
            .chain(&self.exit_short)
            .flat_map(|c| {
                let against = match &c.against {
                    Comparand::Indicator(spec) => Some(spec),
                    _ => None,
                };
                std::iter::once(&c.indicator).chain(against)
            })
    }
}

impl fmt::Display for CustomParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (trend, conditions) in self.groups() {
            if conditions.is_empty() {
                continue;
            }
            let rendered: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
            parts.push(format!("{} when {}", trend, rendered.join(" and ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// User-assembled strategy: four groups of conditions, one per trend.
/// A group fires when it has conditions and all of them hold. The strategy
/// reports a trend only when exactly one group fires.
pub struct CustomStrategy {
    params: CustomParams,
    cache: IndicatorCache,
}

impl CustomStrategy {
    pub fn new(params: &CustomParams) -> Result<Self, ConfigError> {
        if params.specs().any(|spec| spec.period == 0) {
            return Err(ConfigError::ZeroPeriod(params.name.clone()));
        }
        Ok(Self {
            params: params.clone(),
            cache: IndicatorCache::new(),
        })
    }

    fn indicator(
        cache: &mut IndicatorCache,
        memo: &mut HashMap<IndicatorSpec, f64>,
        spec: &IndicatorSpec,
        window: &[Bar],
    ) -> Result<f64, IndicatorError> {
        if let Some(value) = memo.get(spec) {
            return Ok(*value);
        }
        let value = match spec.kind {
            IndicatorKind::Sma => {
                cache.moving_average(AverageKind::Sma, window, spec.period, spec.price)?
            }
            IndicatorKind::Ema => {
                cache.moving_average(AverageKind::Ema, window, spec.period, spec.price)?
            }
            IndicatorKind::Wma => {
                cache.moving_average(AverageKind::Wma, window, spec.period, spec.price)?
            }
            IndicatorKind::Rsi => cache.rsi(window, spec.period, spec.price, 0)?,
        };
        memo.insert(*spec, value);
        Ok(value)
    }
}

impl Strategy for CustomStrategy {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn min_period(&self) -> usize {
        self.params
            .specs()
            .map(IndicatorSpec::required_bars)
            .max()
            .unwrap_or(1)
    }

    fn get_trend(&mut self, window: &[Bar]) -> Result<Option<Trend>, IndicatorError> {
        let current_price = window
            .last()
            .map(|bar| bar.close)
            .ok_or(IndicatorError::NotEnoughData { needed: 1, got: 0 })?;

        let mut memo = HashMap::new();
        let mut fired = Vec::new();

        for (trend, conditions) in self.params.groups() {
            if conditions.is_empty() {
                continue;
            }
            let mut holds = true;
            for condition in conditions {
                let left = Self::indicator(&mut self.cache, &mut memo, &condition.indicator, window)?;
                let right = match &condition.against {
                    Comparand::CurrentPrice => current_price,
                    Comparand::Constant { value } => *value,
                    Comparand::Indicator(spec) => {
                        Self::indicator(&mut self.cache, &mut memo, spec, window)?
                    }
                };
                let result = condition.operator.apply(left, right);
                trace!(id = %condition.id, %condition, left, right, result, "Condition evaluated");
                if !result {
                    holds = false;
                    break;
                }
            }
            if holds {
                fired.push(trend);
            }
        }

        Ok(match fired.as_slice() {
            [only] => Some(*only),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(prices: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Bar::flat(start + Duration::hours(i as i64), *p))
            .collect()
    }

    fn condition(kind: IndicatorKind, period: usize, operator: Operator, against: Comparand) -> Condition {
        Condition {
            id: Uuid::new_v4(),
            indicator: IndicatorSpec {
                kind,
                period,
                price: PriceField::Close,
            },
            operator,
            against,
        }
    }

    #[test]
    fn single_true_group_sets_the_trend() {
        let params = CustomParams {
            name: "Dip buyer".to_string(),
            enter_long: vec![condition(
                IndicatorKind::Sma,
                3,
                Operator::Less,
                Comparand::CurrentPrice,
            )],
            exit_long: vec![condition(
                IndicatorKind::Rsi,
                3,
                Operator::Greater,
                Comparand::Constant { value: 101.0 },
            )],
            enter_short: vec![],
            exit_short: vec![],
        };
        let mut strategy = CustomStrategy::new(&params).unwrap();
        assert_eq!(strategy.min_period(), 4);
        assert_eq!(strategy.name(), "Dip buyer");

        let series = bars(&[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(strategy.get_trend(&series).unwrap(), Some(Trend::EnterLong));
    }

    #[test]
    fn two_true_groups_cancel_out() {
        let sma_above_zero = condition(
            IndicatorKind::Sma,
            2,
            Operator::Greater,
            Comparand::Constant { value: 0.0 },
        );
        let params = CustomParams {
            name: "Conflicted".to_string(),
            enter_long: vec![sma_above_zero.clone()],
            exit_long: vec![],
            enter_short: vec![sma_above_zero],
            exit_short: vec![],
        };
        let mut strategy = CustomStrategy::new(&params).unwrap();
        let series = bars(&[10.0, 11.0, 12.0]);
        assert_eq!(strategy.get_trend(&series).unwrap(), None);
    }

    #[test]
    fn indicator_against_indicator() {
        let params = CustomParams {
            name: "Cross".to_string(),
            enter_long: vec![],
            exit_long: vec![],
            enter_short: vec![condition(
                IndicatorKind::Wma,
                2,
                Operator::Less,
                Comparand::Indicator(IndicatorSpec {
                    kind: IndicatorKind::Sma,
                    period: 4,
                    price: PriceField::Close,
                }),
            )],
            exit_short: vec![],
        };
        let mut strategy = CustomStrategy::new(&params).unwrap();
        let series = bars(&[13.0, 12.0, 11.0, 10.0]);
        assert_eq!(strategy.get_trend(&series).unwrap(), Some(Trend::EnterShort));
    }

    #[test]
    fn parses_tagged_conditions() {
        let json = r#"{
            "name": "From file",
            "enter_long": [
                {"indicator": {"kind": "rsi", "period": 14}, "operator": "<=",
                 "against": {"type": "constant", "value": 30.0}},
                {"indicator": {"kind": "ema", "period": 9, "price": "high/low"}, "operator": ">",
                 "against": {"type": "indicator", "kind": "sma", "period": 21}}
            ]
        }"#;
        let params: CustomParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.enter_long.len(), 2);
        assert_eq!(params.enter_long[0].operator, Operator::LessOrEqual);
        assert_eq!(params.enter_long[1].indicator.price, PriceField::HighLow);
        assert_eq!(CustomStrategy::new(&params).unwrap().min_period(), 21);
    }

    #[test]
    fn zero_period_is_rejected() {
        let params = CustomParams {
            name: "Broken".to_string(),
            enter_long: vec![condition(
                IndicatorKind::Ema,
                0,
                Operator::Greater,
                Comparand::CurrentPrice,
            )],
            exit_long: vec![],
            enter_short: vec![],
            exit_short: vec![],
        };
        assert_eq!(
            CustomStrategy::new(&params).err(),
            Some(ConfigError::ZeroPeriod("Broken".to_string()))
        );
    }
}
