use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use toml::Value;

use crate::collaborators::Transport;
use crate::events::{Event, EventBus};
use crate::store::{ConfigurationStore, RemoteSettings};
use crate::utils::LogErrUnwrap;

const INVALID_TRANSACTION_ID: &str = "0";
const RESPONSE_OK: i64 = 0;

const TRANSACTION_ID_KEY: &str = "axles_change_trn_id";
const STATUS_KEY: &str = "axles_change_status";
const TOTAL_AXLES_KEY: &str = "current_total_axles";
const TRAILER_AXLES_KEY: &str = "current_axles";
const DEFAULT_AXLES_KEY: &str = "default_axis";

/// The state of the last axle change, as persisted in the configuration store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AxlesChangeStatus {
    Requested,
    Approved,
    Rejected,
}

impl AxlesChangeStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(AxlesChangeStatus::Requested),
            2 => Some(AxlesChangeStatus::Approved),
            3 => Some(AxlesChangeStatus::Rejected),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            AxlesChangeStatus::Requested => 1,
            AxlesChangeStatus::Approved => 2,
            AxlesChangeStatus::Rejected => 3,
        }
    }
}

/// The acknowledgement of an axle change sent by the toll charger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AxlesChangeAck {
    pub trn_id: String,
    pub response: i64,
}

#[derive(Debug, Error)]
pub enum AckError {
    #[error("malformed axles change acknowledgement: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn parse_ack(message: &str) -> Result<AxlesChangeAck, AckError> {
    Ok(serde_json::from_str(message)?)
}

/// # Explanation
/// The AxlesChangeManager tracks the approval of the vehicle axle configuration. A change of the axle count
/// that carries a transaction id must be approved by the toll charger; until the matching acknowledgement
/// arrives the axle configuration is not approved (see AxlesConfigApproved), which keeps the service out
/// of the Active status.
///
/// The transaction id, the status and the total axle count are persisted, so a pending change survives a
/// restart and is published again when the lifecycle starts running.
pub struct AxlesChangeManager {
    store: Arc<dyn ConfigurationStore>,
    transaction_id: String,
    status: AxlesChangeStatus,
    total_axles: u32,
}

impl AxlesChangeManager {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        let settings = RemoteSettings::new(store.as_ref());
        let transaction_id = settings
            .get_string(TRANSACTION_ID_KEY)
            .unwrap_or(INVALID_TRANSACTION_ID.to_string());
        let status = match settings.get_i32(STATUS_KEY) {
            Some(code) => AxlesChangeStatus::from_code(i64::from(code)).unwrap_or_else(|| {
                log::error!("unknown axles change status {}", code);
                AxlesChangeStatus::Approved
            }),
            None => AxlesChangeStatus::Approved,
        };
        log::info!("axles change {:?}, transaction id {}", status, transaction_id);

        let mut manager = AxlesChangeManager {
            store,
            transaction_id,
            status,
            total_axles: 0,
        };
        manager.total_axles = manager.configured_total_axles();
        manager
    }

    pub fn status(&self) -> AxlesChangeStatus {
        self.status
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn is_approved(&self) -> bool {
        self.status == AxlesChangeStatus::Approved
    }

    /// # Explanation
    /// Emits the approval of the axle configuration found at startup. A rejected change is still waiting
    /// for a new answer, so it counts as requested.
    pub fn announce(&mut self, bus: &mut EventBus) {
        if self.status == AxlesChangeStatus::Rejected {
            self.status = AxlesChangeStatus::Requested;
        }
        if !self.is_approved() {
            self.persist_total_axles();
        }
        bus.emit(Event::AxlesConfigApproved(self.is_approved()));
    }

    pub fn on_change_requested(
        &mut self,
        new_axles: u32,
        transaction_id: &str,
        service_active: bool,
        transport: &dyn Transport,
        bus: &mut EventBus,
    ) {
        log::info!(
            "axles change requested, new axles = {}, transaction id = '{}'",
            new_axles,
            transaction_id
        );
        let saved_total = RemoteSettings::new(self.store.as_ref())
            .get_u32(TOTAL_AXLES_KEY)
            .unwrap_or(0);

        if !transaction_id.is_empty() && saved_total != new_axles {
            log::info!("the axles change must be approved by the toll charger");
            if service_active {
                self.publish(new_axles, transaction_id, transport);
            }
            self.total_axles = new_axles;
            self.persist_total_axles();
            self.status = AxlesChangeStatus::Requested;
            self.persist_status();
            self.transaction_id = transaction_id.to_string();
            self.store
                .set(TRANSACTION_ID_KEY, Value::String(self.transaction_id.clone()))
                .log_err_unwrap(());
            bus.emit(Event::AxlesConfigApproved(false));
        } else {
            log::info!("the axles change does not require an approval");
            self.total_axles = new_axles;
            self.persist_total_axles();
            self.persist_status();
        }
    }

    /// # Explanation
    /// Handles the acknowledgement message of the toll charger. Malformed messages, messages while no change
    /// is pending and messages for another transaction are logged and ignored.
    pub fn on_ack(&mut self, message: &str, bus: &mut EventBus) {
        let ack = match parse_ack(message) {
            Ok(ack) => ack,
            Err(e) => {
                log::error!("{}", e);
                return;
            }
        };
        log::debug!("{:?}", ack);

        if self.status != AxlesChangeStatus::Requested {
            log::warn!("unexpected axles change acknowledgement, ignored");
            return;
        }
        if ack.trn_id != self.transaction_id {
            log::debug!("the acknowledgement {} does not match the current request", ack.trn_id);
            return;
        }

        if ack.response == RESPONSE_OK {
            log::info!("axles change approved by the toll charger");
            self.status = AxlesChangeStatus::Approved;
            self.persist_status();
            bus.emit(Event::AxlesConfigApproved(true));
        } else {
            log::warn!(
                "axles change rejected by the toll charger with response {}, still waiting for approval",
                ack.response
            );
        }
    }

    /// Publishes a change that is still waiting for approval.
    pub fn notify_last_change(&mut self, service_active: bool, transport: &dyn Transport) {
        if self.is_approved() {
            return;
        }

        self.total_axles = self.configured_total_axles();
        if self.total_axles != 0 && service_active {
            let transaction_id = self.transaction_id.clone();
            self.publish(self.total_axles, &transaction_id, transport);
        }
    }

    fn publish(&self, axles: u32, transaction_id: &str, transport: &dyn Transport) {
        log::info!("sending axles change {}, transaction id {}", axles, transaction_id);
        transport
            .publish_axles_change(transaction_id, axles)
            .log_err_unwrap(());
    }

    fn configured_total_axles(&self) -> u32 {
        let settings = RemoteSettings::new(self.store.as_ref());
        let trailer = settings.get_u32(TRAILER_AXLES_KEY).unwrap_or(0);
        let default = settings.get_u32(DEFAULT_AXLES_KEY).unwrap_or(0);
        trailer + default
    }

    fn persist_status(&self) {
        self.store
            .set(STATUS_KEY, Value::Integer(self.status.code()))
            .log_err_unwrap(());
    }

    fn persist_total_axles(&self) {
        self.store
            .set(TOTAL_AXLES_KEY, Value::Integer(i64::from(self.total_axles)))
            .log_err_unwrap(());
    }
}
