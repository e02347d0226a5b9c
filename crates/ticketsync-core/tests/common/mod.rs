//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;

use ticketsync_core::models::{
    DriverInfo, GeoLocation, OffenceCategory, SelectedOffence, TicketStatus, VehicleInfo,
    VehicleType,
};
use ticketsync_core::sync::{
    ResultStatus, SyncRequest, SyncResponse, SyncResults, SyncTransport, TicketResult,
    TransportError, TransportResult,
};
use ticketsync_core::{SyncSettings, TicketPayload};

type Handler = dyn Fn(&SyncRequest) -> TransportResult<SyncResponse> + Send + Sync;

/// In-process stand-in for the `/sync` endpoint.
pub struct ScriptedServer {
    handler: Box<Handler>,
    gate: Option<Semaphore>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl ScriptedServer {
    pub fn new(
        handler: impl Fn(&SyncRequest) -> TransportResult<SyncResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Accepts every ticket, assigning `S-<local id>` as server id.
    pub fn accepting() -> Self {
        Self::new(|request| Ok(accept_all(request, at(0))))
    }

    pub fn unreachable() -> Self {
        Self::new(|_| Err(TransportError::Connect("network unreachable".into())))
    }

    /// Holds every exchange until `open_gate` releases it.
    pub fn gated(self) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..self
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl SyncTransport for ScriptedServer {
    async fn exchange(&self, request: &SyncRequest) -> TransportResult<SyncResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| TransportError::Connect("gate closed".into()))?;
        }
        (self.handler)(request)
    }
}

/// Success for every ticket in the request.
pub fn accept_all(request: &SyncRequest, sync_timestamp: DateTime<Utc>) -> SyncResponse {
    SyncResponse {
        sync_timestamp,
        results: SyncResults {
            tickets: request
                .tickets
                .iter()
                .map(|change| success(&change.id, &server_id_for(change)))
                .collect(),
            photos: Vec::new(),
        },
        server_updates: Default::default(),
    }
}

pub fn server_id_for(change: &ticketsync_core::sync::TicketChange) -> String {
    change
        .server_id
        .clone()
        .unwrap_or_else(|| format!("S-{}", change.id))
}

pub fn success(local_id: &str, server_id: &str) -> TicketResult {
    TicketResult {
        local_id: local_id.to_string(),
        server_id: Some(server_id.to_string()),
        status: ResultStatus::Success,
        error: None,
        error_code: None,
    }
}

/// Fixed sync timestamps, `minutes` after a reference instant.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

/// Settings without transport retries, so failures surface immediately.
pub fn settings() -> SyncSettings {
    SyncSettings {
        transport_attempts: 1,
        ..SyncSettings::default()
    }
}

pub fn payload(ticket_number: &str) -> TicketPayload {
    payload_with_fine(ticket_number, 150.0)
}

pub fn payload_with_fine(ticket_number: &str, fine: f64) -> TicketPayload {
    TicketPayload {
        ticket_number: ticket_number.to_string(),
        vehicle: VehicleInfo {
            registration_number: "AS-8812-19".to_string(),
            make: Some("Nissan".to_string()),
            model: Some("Almera".to_string()),
            color: Some("Blue".to_string()),
            vehicle_type: VehicleType::Taxi,
        },
        driver: Some(DriverInfo {
            first_name: "Ama".to_string(),
            last_name: "Boateng".to_string(),
            license_number: Some("DL-90210".to_string()),
            phone: Some("+233200000000".to_string()),
        }),
        offences: vec![SelectedOffence {
            id: "PRK-02".to_string(),
            name: "Parking on a walkway".to_string(),
            category: OffenceCategory::Parking,
            fine,
            notes: None,
        }],
        total_fine: fine,
        location: GeoLocation {
            latitude: 6.6885,
            longitude: -1.6244,
            accuracy: Some(12.0),
            address: Some("Adum, Kumasi".to_string()),
        },
        notes: None,
        officer_id: "OFF-118".to_string(),
        issued_at: at(-60),
        status: TicketStatus::Unpaid,
    }
}
