use std::sync::Arc;

use toml::Value;

use crate::store::{ConfigurationStore, RemoteSettings, StoreError};

const DATA_ID_KEY: &str = "data_id";

/// # Explanation
/// The DataIdGenerator hands out the identifiers of the admitted fixes. The counter is seeded lazily from
/// the configuration store (key `data_id`) and only written back when persist is called, so a
/// restart continues where the last clean shutdown stopped.
pub struct DataIdGenerator {
    store: Arc<dyn ConfigurationStore>,
    current: Option<i64>,
}

impl DataIdGenerator {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        DataIdGenerator { store, current: None }
    }

    pub fn next_id(&mut self) -> String {
        let store = &self.store;
        let current = self.current.get_or_insert_with(|| {
            i64::from(RemoteSettings::new(store.as_ref()).get_u32(DATA_ID_KEY).unwrap_or(0))
        });
        *current += 1;
        current.to_string()
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        match self.current {
            Some(current) => self.store.set(DATA_ID_KEY, Value::Integer(current)),
            None => Ok(()),
        }
    }
}
