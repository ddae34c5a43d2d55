use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;

use ingest::{udp, PipelineConfig};
use telemetry::Preprocessor;
use trainer::Trainer;
use utils::{StopToken, WorkerLoop};

#[derive(Parser, Debug)]
#[command(name = "wisim-pipeline", about = "Online telemetry ingestion and forecaster training")]
struct Args {
    /// YAML pipeline configuration; defaults are used when the file is absent.
    #[arg(long, default_value = "configs/pipeline.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PipelineConfig::load(&args.config)?;
    info!("Using configuration: {:?}", config);

    let store = config.store.open();
    let preprocessor = Preprocessor::new(store.clone()).context("Failed to prepare the store")?;
    let sender = preprocessor.sender();
    let build_model = forecast_core::builder(config.model.clone());
    let trainer = Trainer::new(config.trainer.clone(), store, build_model)
        .context("Failed to set up the trainer")?;

    let stop = StopToken::new();
    let preprocessor_wait = Duration::from_millis(config.preprocessor.wait_time_ms);
    let preprocessing = WorkerLoop::new(preprocessor, preprocessor_wait)
        .with_stop_token(stop.clone())
        .start()?;
    let training = WorkerLoop::new(trainer, Duration::from_millis(config.trainer.wait_time_ms))
        .with_stop_token(stop.clone())
        .start()?;

    let socket = UdpSocket::bind(&config.ingest.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.ingest.bind))?;
    info!("Listening for telemetry on {}", socket.local_addr()?);
    let mut ingestion = tokio::spawn(udp::serve(socket, sender));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    let mut failed = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            res = &mut ingestion => {
                match res {
                    Ok(Err(e)) => error!("Ingestion stopped: {:#}", e),
                    Ok(Ok(())) => error!("Ingestion stopped"),
                    Err(e) => error!("Ingestion task failed: {}", e),
                }
                failed = true;
                break;
            }
            _ = tick.tick() => {
                if preprocessing.is_finished() || training.is_finished() {
                    break;
                }
            }
        }
    }

    stop.stop();
    ingestion.abort();
    let (preprocessed, trained) =
        tokio::task::spawn_blocking(move || (preprocessing.join(), training.join())).await?;
    if let Err(e) = preprocessed {
        error!("{:#}", anyhow::Error::new(e));
        failed = true;
    }
    if let Err(e) = trained {
        error!("{:#}", anyhow::Error::new(e));
        failed = true;
    }

    if failed {
        anyhow::bail!("pipeline stopped after a failure");
    }
    info!("Pipeline stopped");
    Ok(())
}
