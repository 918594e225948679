use std::process::ExitCode;

use eyre::{
    eyre,
    WrapErr as _,
};
use podium_auction::{
    config,
    Config,
    Metrics,
    Podium,
};
use tokio::{
    select,
    signal::unix::{
        signal,
        SignalKind,
    },
};
use tracing::{
    error,
    info,
    instrument,
    warn,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg: Config = match config::get() {
        Err(err) => {
            eprintln!("failed to read configuration:\n{err:?}");
            return ExitCode::FAILURE;
        }
        Ok(cfg) => cfg,
    };

    let mut telemetry_conf = telemetry::configure()
        .set_force_stdout(cfg.force_stdout)
        .set_pretty_print(cfg.pretty_print)
        .set_filter_directives(&cfg.log);

    if !cfg.no_metrics {
        telemetry_conf =
            telemetry_conf.set_metrics(&cfg.metrics_http_listener_addr, env!("CARGO_PKG_NAME"));
    }

    let metrics = match telemetry_conf
        .try_init::<Metrics>(&())
        .wrap_err("failed to setup telemetry")
    {
        Err(e) => {
            eprintln!("initializing podium failed:\n{e:?}");
            return ExitCode::FAILURE;
        }
        Ok(metrics) => metrics,
    };

    info!(
        config = serde_json::to_string(&cfg).expect("serializing to a string cannot fail"),
        "initializing podium"
    );

    let mut podium = match Podium::spawn(cfg, metrics).await {
        Ok(podium) => podium,
        Err(error) => {
            error!(%error, "failed initializing podium");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm = signal(SignalKind::terminate())
        .expect("setting a SIGTERM listener should always work on Unix");

    let exit_reason = select! {
        _ = sigterm.recv() => Ok("received shutdown signal"),
        res = &mut podium => {
            res.and_then(|()| Err(eyre!("podium task exited unexpectedly")))
        }
    };

    shutdown(exit_reason, podium).await
}

#[instrument(skip_all)]
async fn shutdown(reason: eyre::Result<&'static str>, mut service: Podium) -> ExitCode {
    let message = "shutting down";
    let exit_code = match reason {
        Ok(reason) => {
            info!(reason, message);
            if let Err(error) = service.shutdown().await {
                warn!(%error, "encountered errors during shutdown");
            };
            ExitCode::SUCCESS
        }
        Err(reason) => {
            error!(%reason, message);
            ExitCode::FAILURE
        }
    };
    info!("shutdown target reached");
    exit_code
}
