//! POTSO participation rewards: rate-limited heartbeats accumulating uptime.

use parity_scale_codec::{Decode, Encode};

use nhb_api::storage::StateAccess;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::keys::potso_key;

use super::ModuleCtx;
use crate::events::Event;

/// Per-participant liveness record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct PotsoRecord {
    /// Timestamp of the last accepted heartbeat.
    pub last_heartbeat: i64,
    /// Accumulated credited uptime, seconds.
    pub uptime_secs: u64,
    /// Epoch of the current heartbeat counter.
    pub epoch: i64,
    /// Heartbeats accepted in the current epoch.
    pub heartbeats_in_epoch: u32,
}

/// Loads a participant record, defaulting to empty.
pub fn get_record(
    state: &dyn StateAccess,
    ctx: &ModuleCtx<'_>,
) -> Result<PotsoRecord, TxError> {
    match state.get(&potso_key(&ctx.sender))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(PotsoRecord::default()),
    }
}

/// Applies a heartbeat.
///
/// At most `max_heartbeats_per_epoch` heartbeats are accepted per epoch; a
/// rejected heartbeat leaves the stored record untouched. Credited uptime
/// per heartbeat is capped so a long silence cannot be claimed at once.
pub fn apply_heartbeat(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
) -> Result<(), TxError> {
    let config = &ctx.policy.potso;
    if config.epoch_secs <= 0 {
        return Err(TxError::PolicyRejected(
            "potso epoch length must be positive".to_string(),
        ));
    }

    let mut record = get_record(state, ctx)?;
    let epoch = ctx.timestamp.div_euclid(config.epoch_secs);
    if epoch != record.epoch {
        record.epoch = epoch;
        record.heartbeats_in_epoch = 0;
    }
    if record.heartbeats_in_epoch >= config.max_heartbeats_per_epoch {
        return Err(TxError::QuotaExceeded(format!(
            "potso: rate limited, {} heartbeats this epoch",
            record.heartbeats_in_epoch
        )));
    }
    if ctx.timestamp <= record.last_heartbeat {
        return Err(TxError::PolicyRejected(
            "heartbeat timestamp not after the previous one".to_string(),
        ));
    }

    if record.last_heartbeat > 0 {
        let delta = (ctx.timestamp - record.last_heartbeat)
            .min(config.max_uptime_credit_secs)
            .max(0) as u64;
        record.uptime_secs = record.uptime_secs.saturating_add(delta);
    }
    record.last_heartbeat = ctx.timestamp;
    record.heartbeats_in_epoch += 1;
    state.insert(&potso_key(&ctx.sender), &to_bytes_canonical(&record))?;

    ctx.emit(Event::new(
        "potso.heartbeat",
        vec![
            ("participant".to_string(), ctx.sender.to_string()),
            ("uptime_secs".to_string(), record.uptime_secs.to_string()),
        ],
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Overlay, ScratchView};
    use crate::policy::PolicySnapshot;
    use nhb_storage::MemStore;
    use nhb_types::address::Address;

    fn policy(max_heartbeats: u32) -> PolicySnapshot {
        let mut snapshot = PolicySnapshot::from_config(
            &toml::from_str(
                r#"
                chain_id = "187001"
                data_dir = "/tmp/nhb-test"
                listen_addr = "127.0.0.1:0"
                p2p_endpoint = "http://127.0.0.1:0"
                [validator_key]
                kind = "kms"
                value = "env:NHB_TEST_KEY"
                "#,
            )
            .unwrap(),
        );
        snapshot.potso.max_heartbeats_per_epoch = max_heartbeats;
        snapshot.potso.epoch_secs = 86_400;
        snapshot.potso.max_uptime_credit_secs = 3_600;
        snapshot
    }

    #[test]
    fn third_heartbeat_in_epoch_is_rate_limited() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy(2);
        let sender = Address([2; 20]);

        let mut ctx = ModuleCtx::new(sender, 1, 1_000, &policy);
        apply_heartbeat(&mut view, &mut ctx).unwrap();
        let mut ctx = ModuleCtx::new(sender, 2, 1_060, &policy);
        apply_heartbeat(&mut view, &mut ctx).unwrap();

        let before = get_record(&view, &ctx).unwrap();
        assert_eq!(before.uptime_secs, 60);
        assert_eq!(before.heartbeats_in_epoch, 2);

        let mut ctx = ModuleCtx::new(sender, 3, 1_120, &policy);
        let err = apply_heartbeat(&mut view, &mut ctx).unwrap_err();
        assert!(matches!(err, TxError::QuotaExceeded(_)));

        // The stored record is unchanged by the rejected heartbeat.
        let after = get_record(&view, &ctx).unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn uptime_credit_is_capped() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy(10);
        let sender = Address([2; 20]);

        let mut ctx = ModuleCtx::new(sender, 1, 1_000, &policy);
        apply_heartbeat(&mut view, &mut ctx).unwrap();
        // Ten hours of silence only credits the one-hour cap.
        let mut ctx = ModuleCtx::new(sender, 2, 1_000 + 36_000, &policy);
        apply_heartbeat(&mut view, &mut ctx).unwrap();
        assert_eq!(get_record(&view, &ctx).unwrap().uptime_secs, 3_600);
    }

    #[test]
    fn counter_resets_across_epochs() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy(1);
        let sender = Address([2; 20]);

        let mut ctx = ModuleCtx::new(sender, 1, 1_000, &policy);
        apply_heartbeat(&mut view, &mut ctx).unwrap();
        let mut ctx = ModuleCtx::new(sender, 2, 2_000, &policy);
        assert!(apply_heartbeat(&mut view, &mut ctx).is_err());

        // A heartbeat in the next epoch is admitted again.
        let mut ctx = ModuleCtx::new(sender, 3, 90_000, &policy);
        apply_heartbeat(&mut view, &mut ctx).unwrap();
    }
}
