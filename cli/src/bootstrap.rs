// Kernel 6LoWPAN bootstrap
//
// Loads the BLE 6LoWPAN module and flips the debugfs enable switch before the
// gateway starts. Linux only; other platforms have no 6LoWPAN bridge and the
// step is skipped.

use crate::config::BootstrapConfig;
use anyhow::Result;

#[cfg(target_os = "linux")]
pub async fn prepare_kernel(config: &BootstrapConfig) -> Result<()> {
    use anyhow::Context;
    use tokio::io::AsyncWriteExt;

    if !config.enabled {
        tracing::info!("Kernel bootstrap disabled");
        return Ok(());
    }

    let output = tokio::process::Command::new("modprobe")
        .arg(&config.module)
        .output()
        .await
        .context("Failed to run modprobe")?;
    if !output.status.success() {
        anyhow::bail!(
            "modprobe {} failed: {}",
            config.module,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    tracing::info!(module = %config.module, "Kernel module loaded");

    let mut switch = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&config.enable_path)
        .await
        .with_context(|| format!("Failed to open {}", config.enable_path))?;
    switch
        .write_all(b"1\n")
        .await
        .with_context(|| format!("Failed to enable 6LoWPAN via {}", config.enable_path))?;
    switch.flush().await?;
    tracing::info!(path = %config.enable_path, "6LoWPAN enabled");

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub async fn prepare_kernel(config: &BootstrapConfig) -> Result<()> {
    if config.enabled {
        tracing::warn!("BLE 6LoWPAN is only available on Linux, skipping kernel bootstrap");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_bootstrap_is_noop() {
        let config = BootstrapConfig {
            enabled: false,
            module: "definitely_not_a_module".to_string(),
            enable_path: "/nonexistent/6lowpan_enable".to_string(),
        };
        assert!(prepare_kernel(&config).await.is_ok());
    }
}
