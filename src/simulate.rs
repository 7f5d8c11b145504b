use crate::structs::{
    AttributeValue, DEVICE_ID_FIELD, Item, LOCATION_FIELD, SENSOR_TYPE_FIELD, TIME_FIELD,
    VALUE_FIELD,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const DEVICE_COUNT: u32 = 5;
const WAREHOUSE_COUNT: u32 = 3;

/// Parameters for generating synthetic readings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub count: usize,
    pub seed: u64,
    /// Epoch seconds of the first reading.
    pub start: i64,
    /// Seconds between consecutive readings.
    pub interval_secs: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            count: 100,
            seed: 0,
            start: 1_700_000_000,
            interval_secs: 4,
        }
    }
}

/// Generates readings shaped like the ones devices publish.
///
/// A device keeps the sensor type it was first assigned. Temperature values
/// fall in [-10, 100), pressure values in [1, 101), both rounded to two
/// decimals and stored as number attributes.
pub fn simulate_items(config: &SimulationConfig) -> Vec<Item> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut sensor_types: HashMap<String, &'static str> = HashMap::new();

    (0..config.count)
        .map(|i| {
            let device_id = format!("device_{}", rng.gen_range(1..=DEVICE_COUNT));
            let sensor_type = *sensor_types.entry(device_id.clone()).or_insert_with(|| {
                if rng.gen_bool(0.5) {
                    "Pressure"
                } else {
                    "Temperature"
                }
            });
            let value: f64 = match sensor_type {
                "Temperature" => rng.gen_range(-10.0..100.0),
                _ => rng.gen_range(1.0..101.0),
            };
            let location = format!("Warehouse_{}", rng.gen_range(1..=WAREHOUSE_COUNT));
            let time = config.start + config.interval_secs * i as i64;

            Item::from([
                (TIME_FIELD.to_string(), AttributeValue::N(time.to_string())),
                (VALUE_FIELD.to_string(), AttributeValue::N(format!("{:.2}", value))),
                (
                    SENSOR_TYPE_FIELD.to_string(),
                    AttributeValue::S(sensor_type.to_string()),
                ),
                (LOCATION_FIELD.to_string(), AttributeValue::S(location)),
                (DEVICE_ID_FIELD.to_string(), AttributeValue::S(device_id)),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::RawRecord;
    use crate::transform::normalize;

    #[test]
    fn same_seed_same_items() {
        let config = SimulationConfig {
            count: 20,
            seed: 7,
            ..SimulationConfig::default()
        };
        assert_eq!(simulate_items(&config), simulate_items(&config));
    }

    #[test]
    fn devices_keep_their_sensor_type_and_ranges_hold() {
        let config = SimulationConfig {
            count: 200,
            seed: 42,
            ..SimulationConfig::default()
        };
        let raw: Vec<RawRecord> = simulate_items(&config)
            .iter()
            .enumerate()
            .map(|(i, item)| RawRecord::from_item(i, item).unwrap())
            .collect();
        let table = normalize(raw).unwrap();

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for record in &table {
            let first = seen.entry(&record.device_id).or_insert(&record.sensor_type);
            assert_eq!(*first, record.sensor_type);
            match record.sensor_type.as_str() {
                "Temperature" => assert!((-10.0..=100.0).contains(&record.value)),
                _ => assert!((1.0..=101.0).contains(&record.value)),
            }
            assert!(record.location.starts_with("Warehouse_"));
        }
        assert_eq!(table[1].time.timestamp() - table[0].time.timestamp(), 4);
    }
}
