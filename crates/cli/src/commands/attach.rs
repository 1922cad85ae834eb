//! Interactive attach for manual inspection

use anyhow::{Context, Result};
use bench_lib::attach::{AttachTarget, EphemeralContainer, ExternalTool};
use bench_lib::HarnessConfig;
use tracing::info;

use super::Harness;
use crate::output::{print_info, print_success};
use crate::{Cli, SingleMechanismArg};

pub async fn run(
    cli: &Cli,
    config: HarnessConfig,
    mechanism: SingleMechanismArg,
    cleanup: bool,
) -> Result<()> {
    let harness = Harness::connect(cli, config).await?;
    let config = &harness.config;
    let target = AttachTarget::new(&config.namespace, &config.target_pod);

    harness
        .reconciler
        .deploy_pod(&target.namespace, &target.pod, &config.target_template())
        .await
        .with_context(|| format!("Failed to deploy target pod {}", target))?;

    print_info(&format!("Attaching to {}", target));
    let session = match mechanism {
        SingleMechanismArg::ExternalTool => {
            ExternalTool::from_config(config).attach_interactive(&target).await
        }
        SingleMechanismArg::Ephemeral => {
            EphemeralContainer::from_config(harness.api.clone(), config)
                .attach_interactive(&target)
                .await
        }
    };

    if cleanup {
        info!(target = %target, "Cleaning up after interactive session");
        if mechanism == SingleMechanismArg::ExternalTool {
            harness
                .reconciler
                .delete_pod(&target.namespace, &config.session_pod)
                .await
                .context("Failed to delete session pod")?;
        }
        harness
            .reconciler
            .delete_pod(&target.namespace, &target.pod)
            .await
            .context("Failed to delete target pod")?;
    }

    session.context("Interactive session failed")?;
    print_success("Session ended");
    Ok(())
}
