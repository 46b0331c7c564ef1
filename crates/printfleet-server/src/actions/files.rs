//! File store usage actions.

use std::sync::Arc;

use printfleet_core::MachineId;
use printfleet_machines::StorageInfo;
use serde::Serialize;

use super::machines::{MachinePayload, map_machine_action};
use super::{ClientState, FILE_STORE_MACHINE_USAGE, FILE_STORE_TOTAL_USAGE, FleetContext};
use crate::dispatch::{ActionRegistry, ActionResult, Reply};

const NO_FILE_STORE: &str = "No file store is configured.";

/// Reply of `machineFileStore/totalUsage`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TotalUsage {
    /// Usage of the whole store.
    pub total_usage: StorageInfo,
}

impl ActionResult for TotalUsage {
    fn is_success(&self) -> bool {
        true
    }
}

/// Reply of `machineFileStore/machineUsage`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineUsage {
    /// Queried machine.
    #[serde(rename = "MachineID")]
    pub machine_id: MachineId,
    /// Usage of the machine's files.
    pub machine_usage: StorageInfo,
}

impl ActionResult for MachineUsage {
    fn is_success(&self) -> bool {
        true
    }
}

pub(super) fn register(actions: &mut ActionRegistry<ClientState>, ctx: &FleetContext) -> usize {
    let mut registered = 0;

    let machines = Arc::clone(&ctx.machines);
    registered += usize::from(actions.map_action(FILE_STORE_TOTAL_USAGE, move |_| {
        let store = machines.file_store().cloned();
        async move {
            Ok(match store {
                Some(store) => Reply::Done(TotalUsage {
                    total_usage: store.storage_info(None).await,
                }),
                None => Reply::failure(NO_FILE_STORE),
            })
        }
    }));

    let machines = Arc::clone(&ctx.machines);
    registered += usize::from(map_machine_action(
        actions,
        ctx,
        FILE_STORE_MACHINE_USAGE,
        move |_, payload: MachinePayload, _| {
            let store = machines.file_store().cloned();
            async move {
                Ok(match store {
                    Some(store) => Reply::Done(MachineUsage {
                        machine_usage: store.storage_info(Some(&payload.machine_id)).await,
                        machine_id: payload.machine_id,
                    }),
                    None => Reply::failure(NO_FILE_STORE),
                })
            }
        },
    ));

    registered
}
