// src/device/sensor.rs - Simulated environmental sensors
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    #[default]
    Temperature,
    Humidity,
    Distance,
}

impl SensorKind {
    pub fn default_value(self) -> f64 {
        match self {
            SensorKind::Temperature => 25.0,
            SensorKind::Humidity => 50.0,
            SensorKind::Distance => 20.0,
        }
    }

    /// Physically plausible range of readings.
    pub fn range(self) -> (f64, f64) {
        match self {
            SensorKind::Temperature => (-40.0, 125.0),
            SensorKind::Humidity => (0.0, 100.0),
            SensorKind::Distance => (2.0, 400.0),
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "C",
            SensorKind::Humidity => "%",
            SensorKind::Distance => "cm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorState {
    pub name: String,
    pub kind: SensorKind,
    pub value: f64,
    pub unit: String,
}

impl SensorState {
    pub fn new(name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: kind.default_value(),
            unit: kind.unit().to_string(),
        }
    }

    /// Random walk for slow quantities, a fresh sample for distance.
    /// Returns the new value, rounded to two decimals.
    pub fn perturb(&mut self, rng: &mut StdRng) -> f64 {
        let (low, high) = self.kind.range();
        let next = match self.kind {
            SensorKind::Temperature => self.value + rng.random_range(-0.2..=0.2),
            SensorKind::Humidity => self.value + rng.random_range(-1.0..=1.0),
            SensorKind::Distance => rng.random_range(5.0..=50.0),
        };
        self.value = (next.clamp(low, high) * 100.0).round() / 100.0;
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_defaults() {
        let sensor = SensorState::new("hum1", SensorKind::Humidity);
        assert_eq!(sensor.value, 50.0);
        assert_eq!(sensor.unit, "%");
    }

    #[test]
    fn test_perturbation_stays_bounded() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut temperature = SensorState::new("t", SensorKind::Temperature);
        let mut humidity = SensorState::new("h", SensorKind::Humidity);
        humidity.value = 99.5;
        let mut distance = SensorState::new("d", SensorKind::Distance);
        for _ in 0..500 {
            let before = temperature.value;
            let after = temperature.perturb(&mut rng);
            assert!((after - before).abs() <= 0.2 + 0.005);
            assert!((0.0..=100.0).contains(&humidity.perturb(&mut rng)));
            assert!((5.0..=50.0).contains(&distance.perturb(&mut rng)));
        }
    }
}
