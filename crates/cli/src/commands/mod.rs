//! Subcommand implementations

pub mod attach;
pub mod memory;
pub mod startup;
pub mod summary;

use anyhow::{Context, Result};
use bench_lib::cluster::{ClusterApi, KubeCluster, Reconciler};
use bench_lib::{HarnessConfig, MechanismKind};
use std::sync::Arc;

use crate::{Cli, MechanismArg};

/// Connected cluster plus the configuration every subcommand shares
pub struct Harness {
    pub config: HarnessConfig,
    pub api: Arc<dyn ClusterApi>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub async fn connect(cli: &Cli, config: HarnessConfig) -> Result<Self> {
        let cluster = KubeCluster::connect(cli.kubeconfig.as_deref(), config.namespace_query_timeout)
            .await
            .context("Failed to connect to the cluster")?;
        let api: Arc<dyn ClusterApi> = Arc::new(cluster);
        let reconciler = Reconciler::new(Arc::clone(&api), config.reconcile());

        reconciler
            .ensure_namespace(&config.namespace)
            .await
            .with_context(|| format!("Failed to ensure namespace {}", config.namespace))?;

        Ok(Self {
            config,
            api,
            reconciler,
        })
    }
}

/// Mechanisms selected on the command line, external tool first
pub fn mechanisms(arg: MechanismArg) -> Vec<MechanismKind> {
    match arg {
        MechanismArg::All => vec![MechanismKind::ExternalTool, MechanismKind::EphemeralContainer],
        MechanismArg::ExternalTool => vec![MechanismKind::ExternalTool],
        MechanismArg::Ephemeral => vec![MechanismKind::EphemeralContainer],
    }
}
