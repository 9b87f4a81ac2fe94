use anyhow::{Result, anyhow};
use clap::Parser;

use irongate_core::config::IronGateConfig;
use irongate_daemon::cli::DaemonCli;
use irongate_daemon::gateway::Gateway;
use irongate_daemon::logging;
use irongate_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드: 파일 → 환경변수 → CLI 순으로 덮어씀
    let mut config = IronGateConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow!("failed to load config {}: {e}", cli.config.display()))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow!("config validation failed: {e}"))?;

    if cli.validate {
        // 룰 파일까지 파싱해 본 뒤 종료
        let loaded = Gateway::new(&config)
            .load_rule_files(&config)
            .await
            .map_err(|e| anyhow!("rule validation failed: {e}"))?;
        println!(
            "configuration OK ({} nat rules, {} qos rules)",
            loaded.nat, loaded.qos
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "irongate-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}
