//! Digital twin link manager.
//!
//! Creates and removes device/asset relationships through named measure
//! slots, mutating both twin documents. Every validation runs before the
//! first write, so a failed call leaves both documents untouched; the
//! mirrored pair-write happens while the device's and asset's locks are
//! both held (acquired in sorted key order), so no interleaved ingestion
//! or second link call can observe a half-updated pair.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use twin_sync_repository::{Document, DocumentStore};
use twin_sync_shared::types::{
    DigitalTwin, HistoryEvent, HistoryEventKind, SlotMapping, TwinId, TwinKind, TwinLink,
};

use crate::errors::LinkError;
use crate::history::HistoryAppender;
use crate::lock::LockRegistry;

/// One requested device/asset link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRequest {
    pub asset_id: TwinId,
    /// Explicit device-slot to asset-slot assignments.
    pub measure_slots: Vec<SlotMapping>,
    /// Auto-assign any device slot whose type matches a same-named,
    /// unclaimed asset slot.
    pub implicit_measures_linking: bool,
}

/// One requested link removal or reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub asset_id: TwinId,
    /// Remove the entire link regardless of which slots were mapped.
    pub all_measures: bool,
    /// Device-slot names whose mappings should be removed.
    pub measure_slots: Vec<String>,
}

pub struct LinkManager {
    store: Arc<dyn DocumentStore>,
    locks: Arc<LockRegistry>,
    history: Arc<HistoryAppender>,
    lock_timeout: Duration,
}

impl LinkManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<LockRegistry>,
        history: Arc<HistoryAppender>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            history,
            lock_timeout,
        }
    }

    async fn read_twin(&self, engine: &str, id: &TwinId) -> Result<DigitalTwin, LinkError> {
        let doc = self
            .store
            .get(engine, id.kind.collection(), &id.document_id())
            .await?
            .ok_or_else(|| LinkError::TwinNotFound(id.clone()))?;
        Ok(serde_json::from_value(doc.body)?)
    }

    async fn write_twin(&self, engine: &str, twin: &DigitalTwin) -> Result<(), LinkError> {
        let doc = Document::new(twin.id.document_id(), serde_json::to_value(twin)?);
        self.store
            .update(engine, twin.id.kind.collection(), &doc)
            .await?;
        Ok(())
    }

    /// Links a device to an asset through measure-slot mappings.
    ///
    /// Re-entrant: linking an already linked pair extends or remaps the
    /// existing slot mapping. A device holds at most one asset link.
    ///
    /// # Arguments
    ///
    /// * `engine` - Tenant namespace holding both twins.
    /// * `device_id` - The device to link.
    /// * `links` - Requested assignments; all entries must resolve to one
    ///   asset.
    ///
    /// # Returns
    ///
    /// A `Result` indicating success, or a `LinkError` raised before any
    /// write if validation failed.
    #[instrument(skip(self, links), fields(device = %device_id))]
    pub async fn link_assets(
        &self,
        engine: &str,
        device_id: &TwinId,
        links: &[LinkRequest],
    ) -> Result<(), LinkError> {
        if device_id.kind != TwinKind::Device {
            return Err(LinkError::WrongKind(device_id.clone(), "device"));
        }

        let mut keys: Vec<String> = vec![device_id.lock_key()];
        keys.extend(links.iter().map(|l| l.asset_id.lock_key()));
        let _guards = self.locks.acquire_ordered(&keys, self.lock_timeout).await?;

        let mut device = self.read_twin(engine, device_id).await?;

        // All requests must resolve to a single asset: either the one the
        // device is already linked to, or one new peer.
        let mut asset: Option<DigitalTwin> = None;
        let mut mappings: BTreeMap<String, String> = BTreeMap::new();

        for request in links {
            if request.asset_id.kind != TwinKind::Asset {
                return Err(LinkError::WrongKind(request.asset_id.clone(), "asset"));
            }
            if let Some(existing) = device.links.first() {
                if existing.peer != request.asset_id {
                    return Err(LinkError::AlreadyLinkedElsewhere {
                        device: device_id.clone(),
                        asset: existing.peer.clone(),
                    });
                }
            }
            let target = if let Some(current) = asset.clone() {
                if current.id != request.asset_id {
                    return Err(LinkError::AlreadyLinkedElsewhere {
                        device: device_id.clone(),
                        asset: current.id.clone(),
                    });
                }
                current
            } else {
                let target = self.read_twin(engine, &request.asset_id).await?;
                if device.engine_id != target.engine_id {
                    return Err(LinkError::CrossEngine {
                        device: device_id.clone(),
                        device_engine: device.engine_id.clone(),
                        asset: request.asset_id.clone(),
                        asset_engine: target.engine_id.clone(),
                    });
                }
                // Start from the mappings already agreed between the pair.
                if let Some(link) = device.link_to(&request.asset_id) {
                    for mapping in &link.slot_map {
                        mappings.insert(mapping.device_slot.clone(), mapping.asset_slot.clone());
                    }
                }
                asset = Some(target.clone());
                target
            };

            for mapping in &request.measure_slots {
                self.validate_mapping(&device, &target, mapping, &mappings)?;
                mappings.insert(mapping.device_slot.clone(), mapping.asset_slot.clone());
            }

            if request.implicit_measures_linking {
                self.assign_implicit(&device, &target, &mut mappings);
            }
        }

        let Some(mut asset) = asset else {
            return Err(LinkError::EmptyMapping {
                device: device_id.clone(),
            });
        };
        if mappings.is_empty() {
            return Err(LinkError::EmptyMapping {
                device: device_id.clone(),
            });
        }

        let slot_map: Vec<SlotMapping> = mappings
            .into_iter()
            .map(|(device_slot, asset_slot)| SlotMapping {
                device_slot,
                asset_slot,
            })
            .collect();

        device.links = vec![TwinLink {
            peer: asset.id.clone(),
            slot_map: slot_map.clone(),
        }];
        asset.links.retain(|l| l.peer != *device_id);
        asset.links.push(TwinLink {
            peer: device_id.clone(),
            slot_map: slot_map.clone(),
        });

        self.write_twin(engine, &device).await?;
        self.write_twin(engine, &asset).await?;

        let payload = json!({
            "device": device_id,
            "asset": asset.id,
            "slot_map": slot_map,
        });
        self.history
            .add(
                engine,
                &[
                    HistoryEvent::now(device_id.clone(), HistoryEventKind::Link, payload.clone()),
                    HistoryEvent::now(asset.id.clone(), HistoryEventKind::Link, payload),
                ],
            )
            .await?;
        info!(asset = %asset.id, "device linked");
        Ok(())
    }

    fn validate_mapping(
        &self,
        device: &DigitalTwin,
        asset: &DigitalTwin,
        mapping: &SlotMapping,
        pending: &BTreeMap<String, String>,
    ) -> Result<(), LinkError> {
        let device_slot =
            device
                .slot(&mapping.device_slot)
                .ok_or_else(|| LinkError::UnknownDeviceSlot {
                    device: device.id.clone(),
                    slot: mapping.device_slot.clone(),
                })?;
        let asset_slot =
            asset
                .slot(&mapping.asset_slot)
                .ok_or_else(|| LinkError::UnknownAssetSlot {
                    asset: asset.id.clone(),
                    slot: mapping.asset_slot.clone(),
                })?;
        if device_slot.measure_type != asset_slot.measure_type {
            return Err(LinkError::SlotTypeMismatch {
                device_slot: device_slot.name.clone(),
                device_type: device_slot.measure_type.clone(),
                asset_slot: asset_slot.name.clone(),
                asset_type: asset_slot.measure_type.clone(),
            });
        }
        // A slot accepts exactly one producer: reject targets claimed by
        // another device's link, or by another mapping of this very call.
        if let Some(claimed_by) = asset
            .links
            .iter()
            .filter(|l| l.peer != device.id)
            .find(|l| l.slot_map.iter().any(|m| m.asset_slot == mapping.asset_slot))
        {
            return Err(LinkError::SlotClaimed {
                asset: asset.id.clone(),
                slot: mapping.asset_slot.clone(),
                claimed_by: claimed_by.peer.clone(),
            });
        }
        if pending
            .iter()
            .any(|(device_slot, asset_slot)| {
                *asset_slot == mapping.asset_slot && *device_slot != mapping.device_slot
            })
        {
            return Err(LinkError::SlotClaimed {
                asset: asset.id.clone(),
                slot: mapping.asset_slot.clone(),
                claimed_by: device.id.clone(),
            });
        }
        Ok(())
    }

    /// Auto-assigns device slots onto same-named, type-compatible,
    /// unclaimed asset slots. Slots already assigned explicitly in the
    /// same call are not reconsidered.
    fn assign_implicit(
        &self,
        device: &DigitalTwin,
        asset: &DigitalTwin,
        mappings: &mut BTreeMap<String, String>,
    ) {
        let claimed = asset.claimed_asset_slots(Some(&device.id));
        for device_slot in &device.measure_slots {
            if mappings.contains_key(&device_slot.name) {
                continue;
            }
            let Some(asset_slot) = asset.slot(&device_slot.name) else {
                continue;
            };
            if asset_slot.measure_type != device_slot.measure_type {
                continue;
            }
            if claimed.contains(&asset_slot.name.as_str()) {
                continue;
            }
            if mappings.values().any(|target| *target == asset_slot.name) {
                continue;
            }
            mappings.insert(device_slot.name.clone(), asset_slot.name.clone());
        }
    }

    /// Removes or reduces device/asset links.
    ///
    /// Unlinking the last mapping of a link removes the link entirely.
    ///
    /// # Arguments
    ///
    /// * `engine` - Tenant namespace holding both twins.
    /// * `device_id` - The device whose links are removed or reduced.
    /// * `unlinks` - Per-asset removal requests, full or targeted.
    ///
    /// # Returns
    ///
    /// A `Result` indicating success, or a `LinkError` raised before any
    /// write if a requested link or mapping does not exist.
    #[instrument(skip(self, unlinks), fields(device = %device_id))]
    pub async fn unlink_assets(
        &self,
        engine: &str,
        device_id: &TwinId,
        unlinks: &[UnlinkRequest],
    ) -> Result<(), LinkError> {
        if device_id.kind != TwinKind::Device {
            return Err(LinkError::WrongKind(device_id.clone(), "device"));
        }

        let mut keys: Vec<String> = vec![device_id.lock_key()];
        keys.extend(unlinks.iter().map(|u| u.asset_id.lock_key()));
        let _guards = self.locks.acquire_ordered(&keys, self.lock_timeout).await?;

        let mut device = self.read_twin(engine, device_id).await?;
        let mut events = Vec::new();
        let mut assets = Vec::new();

        // Validate and stage every change before the first write, so a
        // rejected entry leaves both sides of every pair untouched.
        for request in unlinks {
            let mut asset = self.read_twin(engine, &request.asset_id).await?;
            let link = device
                .link_to(&request.asset_id)
                .ok_or_else(|| LinkError::NotLinked {
                    device: device_id.clone(),
                    asset: request.asset_id.clone(),
                })?;

            let remaining: Vec<SlotMapping> = if request.all_measures {
                Vec::new()
            } else {
                let mut slot_map = link.slot_map.clone();
                for slot in &request.measure_slots {
                    let before = slot_map.len();
                    slot_map.retain(|m| m.device_slot != *slot);
                    if slot_map.len() == before {
                        return Err(LinkError::UnknownMapping {
                            device: device_id.clone(),
                            asset: request.asset_id.clone(),
                            slot: slot.clone(),
                        });
                    }
                }
                slot_map
            };

            let payload = json!({
                "device": device_id,
                "asset": request.asset_id,
                "slot_map": remaining,
            });
            // A fully drained link disappears; a reduced one stays linked.
            let kind = if remaining.is_empty() {
                device.links.retain(|l| l.peer != request.asset_id);
                asset.links.retain(|l| l.peer != *device_id);
                HistoryEventKind::Unlink
            } else {
                for link in &mut device.links {
                    if link.peer == request.asset_id {
                        link.slot_map = remaining.clone();
                    }
                }
                for link in &mut asset.links {
                    if link.peer == *device_id {
                        link.slot_map = remaining.clone();
                    }
                }
                HistoryEventKind::Link
            };
            events.push(HistoryEvent::now(device_id.clone(), kind, payload.clone()));
            events.push(HistoryEvent::now(request.asset_id.clone(), kind, payload));
            assets.push(asset);
        }

        self.write_twin(engine, &device).await?;
        for asset in &assets {
            self.write_twin(engine, asset).await?;
        }

        self.history.add(engine, &events).await?;
        info!("device unlinked");
        Ok(())
    }

    /// Removes the mirrored link entry from a deleted twin's peer. Used by
    /// the delete cascade; the peer that initiated the delete no longer
    /// exists, so only the surviving side is rewritten.
    pub async fn detach_peer(
        &self,
        engine: &str,
        peer_id: &TwinId,
        removed: &TwinId,
    ) -> Result<(), LinkError> {
        let _guard = self
            .locks
            .acquire(&peer_id.lock_key(), self.lock_timeout)
            .await?;
        let Some(doc) = self
            .store
            .get(engine, peer_id.kind.collection(), &peer_id.document_id())
            .await?
        else {
            return Ok(());
        };
        let mut peer: DigitalTwin = serde_json::from_value(doc.body)?;
        let before = peer.links.len();
        peer.links.retain(|l| l.peer != *removed);
        if peer.links.len() == before {
            return Ok(());
        }
        self.write_twin(engine, &peer).await?;
        self.history
            .add(
                engine,
                &[HistoryEvent::now(
                    peer_id.clone(),
                    HistoryEventKind::Unlink,
                    json!({"removed_peer": removed}),
                )],
            )
            .await?;
        Ok(())
    }
}
