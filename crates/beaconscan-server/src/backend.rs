//! Collaborator selection.
//!
//! Picks the permission, radio and ranging implementations for the running
//! server from the configuration and the enabled features.

use std::sync::Arc;

use async_trait::async_trait;
use beaconscan_core::{
    Collaborators, Config, PermissionProvider, RadioStateSource, RadioStream, RangingSource,
    RangingSubscription, RegionSet, SourceError, SourceResult, StaticPermission,
};
use tracing::warn;

/// Radio and ranging source used when no adapter could be opened.
///
/// Every subscription is refused, so the coordinator stays waiting for a
/// first radio report and never starts ranging.
#[derive(Debug, Clone)]
pub struct NoAdapter {
    reason: String,
}

impl NoAdapter {
    /// Refuse subscriptions with `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn refuse(&self) -> SourceError {
        SourceError::AdapterUnavailable {
            message: self.reason.clone(),
        }
    }
}

#[async_trait]
impl RadioStateSource for NoAdapter {
    async fn subscribe_state_changes(&self) -> SourceResult<RadioStream> {
        Err(self.refuse())
    }
}

#[async_trait]
impl RangingSource for NoAdapter {
    async fn subscribe(&self, _regions: &RegionSet) -> SourceResult<RangingSubscription> {
        Err(self.refuse())
    }
}

/// Build the collaborators described by `config`.
pub async fn collaborators(config: &Config) -> Collaborators {
    #[cfg(feature = "bluetooth")]
    {
        use beaconscan_core::{BluezAdapter, BluezPermission, BluezRadio, BluezRanging};

        let permission: Arc<dyn PermissionProvider> = match config.permission.mode.fixed_grant() {
            Some(grant) => Arc::new(StaticPermission(grant)),
            None => Arc::new(BluezPermission::new(config.scanner.adapter.clone())),
        };

        match BluezAdapter::open(config.scanner.adapter.as_deref()).await {
            Ok(adapter) => Collaborators {
                permission,
                radio: Arc::new(BluezRadio::new(adapter.clone())),
                ranging: Arc::new(BluezRanging::new(adapter, &config.scanner)),
            },
            Err(err) => {
                let err = beaconscan_core::BeaconError::from(err);
                tracing::error!(
                    code = err.error_code(),
                    error = %err,
                    "Bluetooth adapter unavailable; ranging disabled"
                );
                without_adapter(permission, err.to_string())
            }
        }
    }

    #[cfg(not(feature = "bluetooth"))]
    {
        let permission: Arc<dyn PermissionProvider> = match config.permission.mode.fixed_grant() {
            Some(grant) => Arc::new(StaticPermission(grant)),
            None => {
                warn!("Built without BlueZ support; treating permission as denied");
                Arc::new(StaticPermission(beaconscan_core::PermissionGrant::Denied))
            }
        };
        without_adapter(permission, "built without Bluetooth support")
    }
}

fn without_adapter(
    permission: Arc<dyn PermissionProvider>,
    reason: impl Into<String>,
) -> Collaborators {
    let reason = reason.into();
    warn!(%reason, "Radio and ranging will refuse subscriptions");
    let none = Arc::new(NoAdapter::new(reason));
    Collaborators {
        permission,
        radio: Arc::clone(&none) as Arc<dyn RadioStateSource>,
        ranging: none,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beaconscan_core::{Coordinator, Phase, PermissionState};
    use std::time::Duration;

    #[tokio::test]
    async fn test_no_adapter_refuses_subscriptions() {
        let none = NoAdapter::new("no hci0");
        let err = none.subscribe_state_changes().await.err().unwrap();
        assert!(err.to_string().contains("no hci0"));
        assert!(none.subscribe(&RegionSet::empty()).await.is_err());
    }

    #[tokio::test]
    async fn test_coordinator_waits_without_adapter() {
        let collaborators = without_adapter(
            Arc::new(StaticPermission(beaconscan_core::PermissionGrant::Granted)),
            "no adapter",
        );
        let regions = Config::default().region_set().unwrap();
        let coordinator = Coordinator::spawn(regions, collaborators);
        let mut status = coordinator.handle().subscribe();

        let reached = tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| s.phase == Phase::AwaitingFirstRadioState),
        )
        .await
        .map(|waited| waited.is_ok());
        assert_eq!(reached, Ok(true));

        let snapshot = coordinator.shutdown().await;
        assert_eq!(snapshot.permission, PermissionState::Granted);
        assert!(!snapshot.scanning);
    }
}
